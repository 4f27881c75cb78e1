pub use in_memory_catalog_store::InMemoryCatalogStore;
pub use postgres_catalog_store::{PostgresCatalogStore, PostgresCatalogStoreConfig};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;

use crate::api::{
    BorrowerId, CatalogItem, Category, CategoryDetails, CategoryId, CategoryLink, ItemId, Loan,
    LoanId, NewCatalogItem, NewLoan, NewReservation, Reservation, ReservationId,
};

mod in_memory_catalog_store;
mod postgres_catalog_store;

#[derive(Debug, thiserror::Error)]
pub enum CatalogStoreError {
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    #[error("Open loan {0} not found")]
    LoanNotFound(LoanId),

    #[error("Category {0} not found")]
    CategoryNotFound(CategoryId),

    #[error("Active reservation {0} not found")]
    ReservationNotFound(ReservationId),

    #[error("Item {item_id} is not linked to category {category_id}")]
    CategoryLinkNotFound {
        item_id: ItemId,
        category_id: CategoryId,
    },

    #[error("Item {0} is not available")]
    ItemUnavailable(ItemId),

    #[error("Item {0} is already available")]
    ItemAlreadyAvailable(ItemId),

    #[error("Borrower {borrower_id} already reserved item {item_id}")]
    DuplicateReservation {
        item_id: ItemId,
        borrower_id: BorrowerId,
    },

    #[error("Item {item_id} already linked to category {category_id}")]
    DuplicateCategoryLink {
        item_id: ItemId,
        category_id: CategoryId,
    },

    #[error("Item {0} has loan history")]
    ItemHasLoanHistory(ItemId),

    #[error("Failed to deserialize item details: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

impl CatalogStoreError {
    /// Failures worth one more attempt: serialization conflicts and deadlocks.
    /// A closed connection is not retried, the store never reconnects.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogStoreError::DatabaseFailure(err) => err
                .code()
                .map(|code| {
                    code == &SqlState::T_R_SERIALIZATION_FAILURE
                        || code == &SqlState::T_R_DEADLOCK_DETECTED
                })
                .unwrap_or_default(),
            _ => false,
        }
    }
}

/// Persistence port of the circulation core.
///
/// Operations documented as atomic must apply their check and all of their
/// writes as one isolated unit: callers rely on it to keep the availability
/// flag consistent with open loans under concurrent requests.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Adds an item, always available, and returns it with its assigned id
    async fn add_item(&self, item: NewCatalogItem) -> Result<CatalogItem, CatalogStoreError>;

    async fn get_item(&self, item_id: ItemId) -> Result<CatalogItem, CatalogStoreError>;

    /// Lists every item ordered by id
    async fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogStoreError>;

    /// Overwrites descriptive fields of an existing item, the availability flag is left untouched
    async fn update_item(&self, item: &CatalogItem) -> Result<CatalogItem, CatalogStoreError>;

    /// Deletes an item together with its category links and reservations.
    /// Fails with `ItemHasLoanHistory` when any loan references it.
    async fn delete_item(&self, item_id: ItemId) -> Result<(), CatalogStoreError>;

    async fn add_category(&self, details: CategoryDetails)
        -> Result<Category, CatalogStoreError>;

    async fn get_category(&self, category_id: CategoryId) -> Result<Category, CatalogStoreError>;

    /// Lists every category ordered by id
    async fn list_categories(&self) -> Result<Vec<Category>, CatalogStoreError>;

    async fn update_category(
        &self,
        category_id: CategoryId,
        details: CategoryDetails,
    ) -> Result<Category, CatalogStoreError>;

    /// Deletes a category together with its links
    async fn delete_category(&self, category_id: CategoryId) -> Result<(), CatalogStoreError>;

    async fn link_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError>;

    async fn unlink_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError>;

    async fn list_category_links(&self) -> Result<Vec<CategoryLink>, CatalogStoreError>;

    async fn item_ids_in_category(
        &self,
        category_id: CategoryId,
    ) -> Result<HashSet<ItemId>, CatalogStoreError>;

    /// Atomic: checks that the item exists and is available, inserts the loan
    /// and marks the item unavailable
    async fn open_loan(&self, loan: NewLoan) -> Result<Loan, CatalogStoreError>;

    /// Atomic: closes an open loan and marks its item available again
    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> Result<Loan, CatalogStoreError>;

    /// Lists every loan, open and closed, ordered by id
    async fn list_loans(&self) -> Result<Vec<Loan>, CatalogStoreError>;

    async fn list_borrower_loans(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Loan>, CatalogStoreError>;

    /// Atomic: checks that the item exists, is unavailable and that the
    /// borrower has no active reservation for it, then inserts the reservation
    async fn add_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, CatalogStoreError>;

    /// Deactivates an active reservation owned by the borrower
    async fn deactivate_reservation(
        &self,
        reservation_id: ReservationId,
        borrower_id: BorrowerId,
    ) -> Result<Reservation, CatalogStoreError>;

    async fn list_active_reservations_for_borrower(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Reservation>, CatalogStoreError>;

    async fn list_active_reservations_for_item(
        &self,
        item_id: ItemId,
    ) -> Result<Vec<Reservation>, CatalogStoreError>;
}
