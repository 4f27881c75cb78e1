use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};

use chrono::{DateTime, Utc};

use crate::api::{
    BorrowerId, CatalogItem, Category, CategoryDetails, CategoryId, CategoryLink, ItemId, Loan,
    LoanId, NewCatalogItem, NewLoan, NewReservation, Reservation, ReservationId,
};
use crate::catalog_store::{CatalogStore, CatalogStoreError};

#[derive(Default)]
struct CatalogTables {
    items: BTreeMap<ItemId, CatalogItem>,
    categories: BTreeMap<CategoryId, Category>,
    // (item_id, category_id)
    links: BTreeSet<(ItemId, CategoryId)>,
    loans: BTreeMap<LoanId, Loan>,
    reservations: BTreeMap<ReservationId, Reservation>,
}

/// Catalog store kept in process memory.
///
/// All tables sit behind one lock so every atomic operation runs under a
/// single write guard.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    tables: parking_lot::RwLock<CatalogTables>,
    item_sequence_generator: AtomicI32,
    category_sequence_generator: AtomicI32,
    loan_sequence_generator: AtomicI32,
    reservation_sequence_generator: AtomicI32,
}

fn next_id(sequence_generator: &AtomicI32) -> i32 {
    sequence_generator.fetch_add(1, Ordering::Relaxed) + 1
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn add_item(&self, item: NewCatalogItem) -> Result<CatalogItem, CatalogStoreError> {
        let item = CatalogItem {
            id: next_id(&self.item_sequence_generator),
            title: item.title,
            publication_year: item.publication_year,
            publisher: item.publisher,
            available: true,
            cover_url: item.cover_url,
            details: item.details,
        };
        self.tables.write().items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_item(&self, item_id: ItemId) -> Result<CatalogItem, CatalogStoreError> {
        self.tables
            .read()
            .items
            .get(&item_id)
            .cloned()
            .ok_or(CatalogStoreError::ItemNotFound(item_id))
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogStoreError> {
        Ok(self.tables.read().items.values().cloned().collect())
    }

    async fn update_item(&self, item: &CatalogItem) -> Result<CatalogItem, CatalogStoreError> {
        let mut tables = self.tables.write();
        let stored = tables
            .items
            .get_mut(&item.id)
            .ok_or(CatalogStoreError::ItemNotFound(item.id))?;
        *stored = CatalogItem {
            available: stored.available,
            ..item.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_item(&self, item_id: ItemId) -> Result<(), CatalogStoreError> {
        let mut tables = self.tables.write();
        if !tables.items.contains_key(&item_id) {
            return Err(CatalogStoreError::ItemNotFound(item_id));
        }
        if tables.loans.values().any(|loan| loan.item_id == item_id) {
            return Err(CatalogStoreError::ItemHasLoanHistory(item_id));
        }
        tables.items.remove(&item_id);
        tables.links.retain(|(linked_item_id, _)| *linked_item_id != item_id);
        tables
            .reservations
            .retain(|_, reservation| reservation.item_id != item_id);
        Ok(())
    }

    async fn add_category(
        &self,
        details: CategoryDetails,
    ) -> Result<Category, CatalogStoreError> {
        let category = Category {
            id: next_id(&self.category_sequence_generator),
            name: details.name,
            description: details.description,
        };
        self.tables
            .write()
            .categories
            .insert(category.id, category.clone());
        Ok(category)
    }

    async fn get_category(&self, category_id: CategoryId) -> Result<Category, CatalogStoreError> {
        self.tables
            .read()
            .categories
            .get(&category_id)
            .cloned()
            .ok_or(CatalogStoreError::CategoryNotFound(category_id))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, CatalogStoreError> {
        Ok(self.tables.read().categories.values().cloned().collect())
    }

    async fn update_category(
        &self,
        category_id: CategoryId,
        details: CategoryDetails,
    ) -> Result<Category, CatalogStoreError> {
        let mut tables = self.tables.write();
        let category = tables
            .categories
            .get_mut(&category_id)
            .ok_or(CatalogStoreError::CategoryNotFound(category_id))?;
        category.name = details.name;
        category.description = details.description;
        Ok(category.clone())
    }

    async fn delete_category(&self, category_id: CategoryId) -> Result<(), CatalogStoreError> {
        let mut tables = self.tables.write();
        if tables.categories.remove(&category_id).is_none() {
            return Err(CatalogStoreError::CategoryNotFound(category_id));
        }
        tables
            .links
            .retain(|(_, linked_category_id)| *linked_category_id != category_id);
        Ok(())
    }

    async fn link_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError> {
        let mut tables = self.tables.write();
        if !tables.categories.contains_key(&link.category_id) {
            return Err(CatalogStoreError::CategoryNotFound(link.category_id));
        }
        if !tables.items.contains_key(&link.item_id) {
            return Err(CatalogStoreError::ItemNotFound(link.item_id));
        }
        if !tables.links.insert((link.item_id, link.category_id)) {
            return Err(CatalogStoreError::DuplicateCategoryLink {
                item_id: link.item_id,
                category_id: link.category_id,
            });
        }
        Ok(())
    }

    async fn unlink_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError> {
        if self
            .tables
            .write()
            .links
            .remove(&(link.item_id, link.category_id))
        {
            Ok(())
        } else {
            Err(CatalogStoreError::CategoryLinkNotFound {
                item_id: link.item_id,
                category_id: link.category_id,
            })
        }
    }

    async fn list_category_links(&self) -> Result<Vec<CategoryLink>, CatalogStoreError> {
        Ok(self
            .tables
            .read()
            .links
            .iter()
            .map(|&(item_id, category_id)| CategoryLink {
                item_id,
                category_id,
            })
            .collect())
    }

    async fn item_ids_in_category(
        &self,
        category_id: CategoryId,
    ) -> Result<HashSet<ItemId>, CatalogStoreError> {
        Ok(self
            .tables
            .read()
            .links
            .iter()
            .filter(|(_, linked_category_id)| *linked_category_id == category_id)
            .map(|(item_id, _)| *item_id)
            .collect())
    }

    async fn open_loan(&self, loan: NewLoan) -> Result<Loan, CatalogStoreError> {
        let mut tables = self.tables.write();
        let item = tables
            .items
            .get_mut(&loan.item_id)
            .ok_or(CatalogStoreError::ItemNotFound(loan.item_id))?;
        if !item.available {
            return Err(CatalogStoreError::ItemUnavailable(loan.item_id));
        }
        item.available = false;

        let loan = Loan {
            id: next_id(&self.loan_sequence_generator),
            item_id: loan.item_id,
            borrower_id: loan.borrower_id,
            loaned_at: loan.loaned_at,
            due_at: loan.due_at,
            returned_at: None,
        };
        tables.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> Result<Loan, CatalogStoreError> {
        let mut tables = self.tables.write();
        let loan = match tables.loans.get_mut(&loan_id) {
            Some(loan) if loan.is_active() => {
                loan.returned_at = Some(returned_at);
                loan.clone()
            }
            _ => return Err(CatalogStoreError::LoanNotFound(loan_id)),
        };
        if let Some(item) = tables.items.get_mut(&loan.item_id) {
            item.available = true;
        }
        Ok(loan)
    }

    async fn list_loans(&self) -> Result<Vec<Loan>, CatalogStoreError> {
        Ok(self.tables.read().loans.values().cloned().collect())
    }

    async fn list_borrower_loans(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Loan>, CatalogStoreError> {
        Ok(self
            .tables
            .read()
            .loans
            .values()
            .filter(|loan| loan.borrower_id == borrower_id)
            .cloned()
            .collect())
    }

    async fn add_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, CatalogStoreError> {
        let mut tables = self.tables.write();
        let item = tables
            .items
            .get(&reservation.item_id)
            .ok_or(CatalogStoreError::ItemNotFound(reservation.item_id))?;
        if item.available {
            return Err(CatalogStoreError::ItemAlreadyAvailable(reservation.item_id));
        }
        if tables.reservations.values().any(|existing| {
            existing.active
                && existing.item_id == reservation.item_id
                && existing.borrower_id == reservation.borrower_id
        }) {
            return Err(CatalogStoreError::DuplicateReservation {
                item_id: reservation.item_id,
                borrower_id: reservation.borrower_id,
            });
        }

        let reservation = Reservation {
            id: next_id(&self.reservation_sequence_generator),
            item_id: reservation.item_id,
            borrower_id: reservation.borrower_id,
            reserved_at: reservation.reserved_at,
            active: true,
        };
        tables
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn deactivate_reservation(
        &self,
        reservation_id: ReservationId,
        borrower_id: BorrowerId,
    ) -> Result<Reservation, CatalogStoreError> {
        match self.tables.write().reservations.get_mut(&reservation_id) {
            Some(reservation) if reservation.active && reservation.borrower_id == borrower_id => {
                reservation.active = false;
                Ok(reservation.clone())
            }
            _ => Err(CatalogStoreError::ReservationNotFound(reservation_id)),
        }
    }

    async fn list_active_reservations_for_borrower(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Reservation>, CatalogStoreError> {
        Ok(self
            .tables
            .read()
            .reservations
            .values()
            .filter(|reservation| reservation.active && reservation.borrower_id == borrower_id)
            .cloned()
            .collect())
    }

    async fn list_active_reservations_for_item(
        &self,
        item_id: ItemId,
    ) -> Result<Vec<Reservation>, CatalogStoreError> {
        Ok(self
            .tables
            .read()
            .reservations
            .values()
            .filter(|reservation| reservation.active && reservation.item_id == item_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests_in_memory_catalog_store {
    use chrono::Duration;

    use super::*;
    use crate::api::ItemDetails;

    fn periodical(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 2020,
            publisher: "Publisher".to_string(),
            cover_url: None,
            details: ItemDetails::Periodical {
                issue: "42".to_string(),
                issn: "1234-5678".to_string(),
                periodicity: "monthly".to_string(),
            },
        }
    }

    fn new_loan(item_id: ItemId, borrower_id: BorrowerId) -> NewLoan {
        let loaned_at = Utc::now();
        NewLoan {
            item_id,
            borrower_id,
            loaned_at,
            due_at: loaned_at + Duration::days(15),
        }
    }

    #[tokio::test]
    /// Simple test to cover loan bookkeeping
    /// 1. Opens a loan, item becomes unavailable
    /// 2. Second loan on the same item is rejected
    /// 3. Closes the loan, item becomes available
    /// 4. Closing it again is rejected as not found
    async fn test_loan_management() {
        let store = InMemoryCatalogStore::default();
        let item = store.add_item(periodical("Nature")).await.unwrap();
        assert!(item.available);

        let loan = store.open_loan(new_loan(item.id, 7)).await.unwrap();
        assert!(loan.is_active());
        assert!(!store.get_item(item.id).await.unwrap().available);

        let second = store.open_loan(new_loan(item.id, 8)).await;
        assert!(matches!(second, Err(CatalogStoreError::ItemUnavailable(..))));

        let closed = store.close_loan(loan.id, Utc::now()).await.unwrap();
        assert!(!closed.is_active());
        assert!(store.get_item(item.id).await.unwrap().available);

        let closed_again = store.close_loan(loan.id, Utc::now()).await;
        assert!(matches!(closed_again, Err(CatalogStoreError::LoanNotFound(..))));

        let unknown_item = store.open_loan(new_loan(item.id + 100, 7)).await;
        assert!(matches!(unknown_item, Err(CatalogStoreError::ItemNotFound(..))));
    }

    #[tokio::test]
    /// Covers category links and restrict-on-delete
    /// 1. Links item to category, duplicate link is rejected
    /// 2. Item with loan history cannot be deleted
    /// 3. Item without loans is deleted together with its links
    async fn test_links_and_deletion() {
        let store = InMemoryCatalogStore::default();
        let borrowed = store.add_item(periodical("Science")).await.unwrap();
        let untouched = store.add_item(periodical("Wired")).await.unwrap();
        let category = store
            .add_category(CategoryDetails {
                name: "Magazines".to_string(),
                description: "".to_string(),
            })
            .await
            .unwrap();

        for item_id in [borrowed.id, untouched.id] {
            store
                .link_item(CategoryLink {
                    item_id,
                    category_id: category.id,
                })
                .await
                .unwrap();
        }
        let duplicate = store
            .link_item(CategoryLink {
                item_id: untouched.id,
                category_id: category.id,
            })
            .await;
        assert!(matches!(
            duplicate,
            Err(CatalogStoreError::DuplicateCategoryLink { .. })
        ));

        let loan = store.open_loan(new_loan(borrowed.id, 1)).await.unwrap();
        store.close_loan(loan.id, Utc::now()).await.unwrap();
        let restricted = store.delete_item(borrowed.id).await;
        assert!(matches!(
            restricted,
            Err(CatalogStoreError::ItemHasLoanHistory(..))
        ));

        store.delete_item(untouched.id).await.unwrap();
        assert_eq!(
            store.item_ids_in_category(category.id).await.unwrap(),
            HashSet::from([borrowed.id])
        );
    }

    #[tokio::test]
    /// Covers reservation bookkeeping
    /// 1. Available item cannot be reserved
    /// 2. Duplicate active reservation is rejected
    /// 3. Deactivated reservation no longer blocks a new one
    async fn test_reservation_management() {
        let store = InMemoryCatalogStore::default();
        let item = store.add_item(periodical("Time")).await.unwrap();

        let new_reservation = NewReservation {
            item_id: item.id,
            borrower_id: 3,
            reserved_at: Utc::now(),
        };
        let available = store.add_reservation(new_reservation.clone()).await;
        assert!(matches!(
            available,
            Err(CatalogStoreError::ItemAlreadyAvailable(..))
        ));

        store.open_loan(new_loan(item.id, 1)).await.unwrap();
        let reservation = store.add_reservation(new_reservation.clone()).await.unwrap();
        let duplicate = store.add_reservation(new_reservation.clone()).await;
        assert!(matches!(
            duplicate,
            Err(CatalogStoreError::DuplicateReservation { .. })
        ));

        let wrong_borrower = store.deactivate_reservation(reservation.id, 4).await;
        assert!(matches!(
            wrong_borrower,
            Err(CatalogStoreError::ReservationNotFound(..))
        ));
        store.deactivate_reservation(reservation.id, 3).await.unwrap();
        assert!(store
            .list_active_reservations_for_item(item.id)
            .await
            .unwrap()
            .is_empty());

        store.add_reservation(new_reservation).await.unwrap();
        assert_eq!(
            store
                .list_active_reservations_for_borrower(3)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
