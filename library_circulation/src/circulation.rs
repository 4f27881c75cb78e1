use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::api::{BorrowerId, ItemId, Loan, LoanId, LoanSummary, NewLoan};
use crate::catalog_store::CatalogStore;
use crate::error::{LibraryError, LibraryResult};
use crate::retry::retry_once;

pub const DEFAULT_LOAN_TERM_DAYS: i64 = 15;

/// Due date of a loan starting at `loaned_at`; missing or non-positive terms use the default.
/// Terms reaching past the representable calendar are rejected.
pub fn due_date(
    loaned_at: DateTime<Utc>,
    term_days: Option<i32>,
) -> LibraryResult<DateTime<Utc>> {
    let term_days = term_days
        .filter(|days| *days > 0)
        .map(i64::from)
        .unwrap_or(DEFAULT_LOAN_TERM_DAYS);
    loaned_at
        .checked_add_signed(Duration::days(term_days))
        .ok_or_else(|| {
            LibraryError::InvalidArgument(format!("Loan term of {term_days} days is too long"))
        })
}

#[derive(Clone)]
pub struct CirculationService {
    store: Arc<dyn CatalogStore>,
}

impl CirculationService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Lends an available item to the borrower
    #[tracing::instrument(skip(self))]
    pub async fn borrow(
        &self,
        item_id: ItemId,
        borrower_id: BorrowerId,
        term_days: Option<i32>,
    ) -> LibraryResult<Loan> {
        let loaned_at = Utc::now();
        let new_loan = NewLoan {
            item_id,
            borrower_id,
            loaned_at,
            due_at: due_date(loaned_at, term_days)?,
        };
        let loan = retry_once("borrow", || self.store.open_loan(new_loan.clone())).await?;
        tracing::info!(loan_id = loan.id, due_at = %loan.due_at, "Item borrowed");
        Ok(loan)
    }

    /// Closes an open loan. Any caller may return any open loan.
    #[tracing::instrument(skip(self))]
    pub async fn return_loan(&self, loan_id: LoanId) -> LibraryResult<()> {
        let returned_at = Utc::now();
        let loan = retry_once("return", || self.store.close_loan(loan_id, returned_at)).await?;
        tracing::info!(item_id = loan.item_id, "Item returned");
        Ok(())
    }

    /// Every loan of the borrower, newest first
    #[tracing::instrument(skip(self))]
    pub async fn list_borrower_loans(
        &self,
        borrower_id: BorrowerId,
    ) -> LibraryResult<Vec<LoanSummary>> {
        let mut loans = self.store.list_borrower_loans(borrower_id).await?;
        let titles: HashMap<ItemId, String> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id, item.title))
            .collect();

        loans.sort_by(|a, b| b.loaned_at.cmp(&a.loaned_at).then(b.id.cmp(&a.id)));
        Ok(loans
            .into_iter()
            .map(|loan| LoanSummary {
                loan_id: loan.id,
                item_id: loan.item_id,
                title: titles.get(&loan.item_id).cloned().unwrap_or_default(),
                loaned_at: loan.loaned_at,
                due_at: loan.due_at,
                returned_at: loan.returned_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod circulation_tests {
    use super::*;
    use crate::api::{ItemDetails, NewCatalogItem};
    use crate::catalog_store::InMemoryCatalogStore;
    use crate::error::{ErrorKind, LibraryError};

    fn book(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 1965,
            publisher: "Chilton".to_string(),
            cover_url: None,
            details: ItemDetails::Book {
                author: Some("Frank Herbert".to_string()),
                isbn: "0-8019-5077-0".to_string(),
                page_count: 412,
            },
        }
    }

    /// Availability flag is true iff no open loan references the item
    async fn assert_availability_invariant(store: &InMemoryCatalogStore) {
        let loans = store.list_loans().await.unwrap();
        for item in store.list_items().await.unwrap() {
            let has_open_loan = loans
                .iter()
                .any(|loan| loan.item_id == item.id && loan.is_active());
            assert_eq!(item.available, !has_open_loan, "item {}", item.id);
        }
    }

    #[test]
    fn due_date_defaults_to_fifteen_days() {
        let now = Utc::now();
        assert_eq!(due_date(now, None).unwrap(), now + Duration::days(15));
        assert_eq!(due_date(now, Some(0)).unwrap(), now + Duration::days(15));
        assert_eq!(due_date(now, Some(-4)).unwrap(), now + Duration::days(15));
        assert_eq!(due_date(now, Some(1)).unwrap(), now + Duration::days(1));
        assert_eq!(due_date(now, Some(30)).unwrap(), now + Duration::days(30));
    }

    #[tokio::test]
    async fn borrow_with_unrepresentable_term_is_rejected() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Dune")).await.unwrap();
        let service = CirculationService::new(store.clone());

        let rejected = service.borrow(item.id, 1, Some(i32::MAX)).await.unwrap_err();
        assert!(matches!(rejected, LibraryError::InvalidArgument(..)));
        assert_eq!(rejected.kind(), ErrorKind::InvalidArgument);
        assert!(store.get_item(item.id).await.unwrap().available);
        assert!(store.list_loans().await.unwrap().is_empty());
        assert_availability_invariant(&store).await;
    }

    #[tokio::test]
    async fn borrow_with_zero_term_applies_default_and_flips_availability() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Dune")).await.unwrap();
        let service = CirculationService::new(store.clone());

        let loan = service.borrow(item.id, 11, Some(0)).await.unwrap();

        assert_eq!(loan.due_at - loan.loaned_at, Duration::days(15));
        assert_eq!(loan.borrower_id, 11);
        assert!(loan.returned_at.is_none());
        assert!(!store.get_item(item.id).await.unwrap().available);
        assert_availability_invariant(&store).await;
    }

    #[tokio::test]
    async fn borrow_fails_for_unknown_or_unavailable_items() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Dune")).await.unwrap();
        let service = CirculationService::new(store.clone());

        let unknown = service.borrow(item.id + 1, 1, None).await;
        assert!(matches!(unknown, Err(LibraryError::ItemNotFound(..))));

        service.borrow(item.id, 1, None).await.unwrap();
        let unavailable = service.borrow(item.id, 2, None).await.unwrap_err();
        assert!(matches!(unavailable, LibraryError::ItemUnavailable(..)));
        assert_eq!(unavailable.kind(), ErrorKind::Conflict);
        assert_availability_invariant(&store).await;
    }

    #[tokio::test]
    async fn return_closes_loan_once() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Dune")).await.unwrap();
        let service = CirculationService::new(store.clone());
        let loan = service.borrow(item.id, 1, Some(7)).await.unwrap();

        service.return_loan(loan.id).await.unwrap();
        assert!(store.get_item(item.id).await.unwrap().available);
        assert_availability_invariant(&store).await;

        let again = service.return_loan(loan.id).await;
        assert!(matches!(again, Err(LibraryError::LoanNotFound(..))));
        let unknown = service.return_loan(loan.id + 100).await;
        assert!(matches!(unknown, Err(LibraryError::LoanNotFound(..))));

        // Item can circulate again
        service.borrow(item.id, 2, None).await.unwrap();
        assert_availability_invariant(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrows_of_one_item_let_exactly_one_through() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Dune")).await.unwrap();
        let service = CirculationService::new(store.clone());

        let handles: Vec<_> = (0..16)
            .map(|borrower_id| {
                let service = service.clone();
                tokio::spawn(async move { service.borrow(item.id, borrower_id, None).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, LibraryError::ItemUnavailable(..))),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.list_loans().await.unwrap().len(), 1);
        assert_availability_invariant(&store).await;
    }

    #[tokio::test]
    async fn borrower_loans_are_listed_newest_first_with_titles() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let dune = store.add_item(book("Dune")).await.unwrap();
        let messiah = store.add_item(book("Dune Messiah")).await.unwrap();
        let service = CirculationService::new(store.clone());

        let first = service.borrow(dune.id, 5, None).await.unwrap();
        service.return_loan(first.id).await.unwrap();
        let second = service.borrow(messiah.id, 5, None).await.unwrap();
        service.borrow(dune.id, 6, None).await.unwrap();

        let loans = service.list_borrower_loans(5).await.unwrap();
        let ids: Vec<LoanId> = loans.iter().map(|loan| loan.loan_id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(loans[0].title, "Dune Messiah");
        assert!(loans[1].returned_at.is_some());
    }
}
