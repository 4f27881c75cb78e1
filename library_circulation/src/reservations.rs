use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::api::{
    BorrowerId, ItemId, NewReservation, Reservation, ReservationId, ReservationSummary,
};
use crate::catalog_store::CatalogStore;
use crate::error::LibraryResult;
use crate::retry::retry_once;

/// FIFO order of a reservation queue: oldest request first, ids break ties
fn sort_fifo(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| a.reserved_at.cmp(&b.reserved_at).then(a.id.cmp(&b.id)));
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn CatalogStore>,
}

impl ReservationService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Queues the borrower for an item that is currently on loan
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        item_id: ItemId,
        borrower_id: BorrowerId,
    ) -> LibraryResult<Reservation> {
        let new_reservation = NewReservation {
            item_id,
            borrower_id,
            reserved_at: Utc::now(),
        };
        let reservation = retry_once("reserve", || {
            self.store.add_reservation(new_reservation.clone())
        })
        .await?;
        tracing::info!(reservation_id = reservation.id, "Item reserved");
        Ok(reservation)
    }

    /// Active reservations of the borrower, oldest first
    #[tracing::instrument(skip(self))]
    pub async fn list_my_reservations(
        &self,
        borrower_id: BorrowerId,
    ) -> LibraryResult<Vec<ReservationSummary>> {
        let mut reservations = self
            .store
            .list_active_reservations_for_borrower(borrower_id)
            .await?;
        sort_fifo(&mut reservations);
        let titles: HashMap<ItemId, String> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id, item.title))
            .collect();

        Ok(reservations
            .into_iter()
            .map(|reservation| ReservationSummary {
                reservation_id: reservation.id,
                item_id: reservation.item_id,
                title: titles
                    .get(&reservation.item_id)
                    .cloned()
                    .unwrap_or_default(),
                reserved_at: reservation.reserved_at,
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        borrower_id: BorrowerId,
    ) -> LibraryResult<()> {
        self.store
            .deactivate_reservation(reservation_id, borrower_id)
            .await?;
        tracing::info!("Reservation cancelled");
        Ok(())
    }

    /// Waiting list of an item in the order it should be served
    #[tracing::instrument(skip(self))]
    pub async fn reservation_queue(&self, item_id: ItemId) -> LibraryResult<Vec<Reservation>> {
        self.store.get_item(item_id).await?;
        let mut reservations = self.store.list_active_reservations_for_item(item_id).await?;
        sort_fifo(&mut reservations);
        Ok(reservations)
    }
}

#[cfg(test)]
mod reservation_tests {
    use super::*;
    use crate::api::{ItemDetails, NewCatalogItem};
    use crate::catalog_store::InMemoryCatalogStore;
    use crate::circulation::CirculationService;
    use crate::error::{ErrorKind, LibraryError};

    const BORROWER_A: BorrowerId = 1;
    const BORROWER_B: BorrowerId = 2;
    const LENDER: BorrowerId = 99;

    fn periodical(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 2024,
            publisher: "Condé Nast".to_string(),
            cover_url: Some("https://covers.example/wired.png".to_string()),
            details: ItemDetails::Periodical {
                issue: "May".to_string(),
                issn: "1059-1028".to_string(),
                periodicity: "monthly".to_string(),
            },
        }
    }

    async fn setup() -> (Arc<InMemoryCatalogStore>, ReservationService, ItemId) {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(periodical("Wired")).await.unwrap();
        CirculationService::new(store.clone())
            .borrow(item.id, LENDER, None)
            .await
            .unwrap();
        (store.clone(), ReservationService::new(store), item.id)
    }

    #[tokio::test]
    async fn queue_keeps_request_order_and_rejects_duplicates() {
        let (_store, service, item_id) = setup().await;

        service.reserve(item_id, BORROWER_A).await.unwrap();
        let duplicate = service.reserve(item_id, BORROWER_A).await.unwrap_err();
        assert!(matches!(duplicate, LibraryError::DuplicateReservation { .. }));
        assert_eq!(duplicate.kind(), ErrorKind::Conflict);
        service.reserve(item_id, BORROWER_B).await.unwrap();

        let queue: Vec<BorrowerId> = service
            .reservation_queue(item_id)
            .await
            .unwrap()
            .iter()
            .map(|reservation| reservation.borrower_id)
            .collect();
        assert_eq!(queue, vec![BORROWER_A, BORROWER_B]);
    }

    #[tokio::test]
    async fn available_or_unknown_items_cannot_be_reserved() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(periodical("Wired")).await.unwrap();
        let service = ReservationService::new(store);

        let available = service.reserve(item.id, BORROWER_A).await.unwrap_err();
        assert!(matches!(available, LibraryError::ItemAlreadyAvailable(..)));
        assert_eq!(available.kind(), ErrorKind::Conflict);

        let unknown = service.reserve(item.id + 1, BORROWER_A).await;
        assert!(matches!(unknown, Err(LibraryError::ItemNotFound(..))));
    }

    #[tokio::test]
    async fn my_reservations_lists_active_ones_oldest_first() {
        let (store, service, first_item) = setup().await;
        let second_item = store.add_item(periodical("Byte")).await.unwrap();
        CirculationService::new(store.clone())
            .borrow(second_item.id, LENDER, None)
            .await
            .unwrap();

        let first = service.reserve(first_item, BORROWER_A).await.unwrap();
        let second = service.reserve(second_item.id, BORROWER_A).await.unwrap();

        let mine = service.list_my_reservations(BORROWER_A).await.unwrap();
        let ids: Vec<ReservationId> = mine.iter().map(|r| r.reservation_id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(mine[1].title, "Byte");

        service.cancel_reservation(first.id, BORROWER_A).await.unwrap();
        let mine = service.list_my_reservations(BORROWER_A).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].reservation_id, second.id);

        let cancelled_again = service.cancel_reservation(first.id, BORROWER_A).await;
        assert!(matches!(
            cancelled_again,
            Err(LibraryError::ReservationNotFound(..))
        ));
        assert!(service.list_my_reservations(BORROWER_B).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_duplicate_reservations_create_one() {
        let (store, service, item_id) = setup().await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.reserve(item_id, BORROWER_A).await })
            })
            .collect();
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(
            store
                .list_active_reservations_for_item(item_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
