use std::sync::Arc;

use crate::catalog::CatalogService;
use crate::catalog_store::CatalogStore;
use crate::circulation::CirculationService;
use crate::dashboard::DashboardAggregator;
use crate::reservations::ReservationService;
use crate::search::SearchEngine;

pub mod api;
pub mod catalog;
pub mod catalog_store;
pub mod circulation;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod reservations;
pub mod retry;
pub mod search;
pub mod settings;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;
#[cfg(any(feature = "server", test))]
mod handlers;

/// Every core service wired to one shared catalog store
#[derive(Clone)]
pub struct Library {
    pub catalog: CatalogService,
    pub search: SearchEngine,
    pub circulation: CirculationService,
    pub reservations: ReservationService,
    pub dashboard: DashboardAggregator,
}

impl Library {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            catalog: CatalogService::new(store.clone()),
            search: SearchEngine::new(store.clone()),
            circulation: CirculationService::new(store.clone()),
            reservations: ReservationService::new(store.clone()),
            dashboard: DashboardAggregator::new(store),
        }
    }
}
