use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, Utc};

use crate::api::{
    BorrowedItemCount, CategoryItemCount, DashboardSummary, ItemId, ItemKind, OverdueLoan,
    PeriodLoanCount,
};
use crate::catalog_store::CatalogStore;
use crate::error::LibraryResult;

pub const DEFAULT_TOP_BORROWED_LIMIT: usize = 10;
pub const DEFAULT_PERIOD_MONTHS: u32 = 6;

fn period_label(year: i32, month: u32) -> String {
    format!("{year}/{month:02}")
}

/// Read only statistics over the whole collection
#[derive(Clone)]
pub struct DashboardAggregator {
    store: Arc<dyn CatalogStore>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn dashboard_summary(&self) -> LibraryResult<DashboardSummary> {
        let items = self.store.list_items().await?;
        let loans = self.store.list_loans().await?;
        let now = Utc::now();

        let count_kind = |kind: ItemKind| {
            items
                .iter()
                .filter(|item| item.details.kind() == kind)
                .count()
        };
        Ok(DashboardSummary {
            total_books: count_kind(ItemKind::Book),
            total_periodicals: count_kind(ItemKind::Periodical),
            total_items: items.len(),
            total_loans: loans.len(),
            active_loans: loans.iter().filter(|loan| loan.is_active()).count(),
            overdue_loans: loans.iter().filter(|loan| loan.is_overdue(now)).count(),
        })
    }

    /// One row per category in id order, empty categories included
    #[tracing::instrument(skip(self))]
    pub async fn items_by_category(&self) -> LibraryResult<Vec<CategoryItemCount>> {
        let categories = self.store.list_categories().await?;
        let mut counts = HashMap::new();
        for link in self.store.list_category_links().await? {
            *counts.entry(link.category_id).or_insert(0usize) += 1;
        }

        Ok(categories
            .into_iter()
            .map(|category| CategoryItemCount {
                total_items: counts.get(&category.id).copied().unwrap_or_default(),
                category_id: category.id,
                category_name: category.name,
            })
            .collect())
    }

    /// Loans started inside `[start, end]` grouped by calendar month.
    /// The window defaults to the last six months.
    #[tracing::instrument(skip(self))]
    pub async fn loans_by_period(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LibraryResult<Vec<PeriodLoanCount>> {
        let now = Utc::now();
        let end = end.unwrap_or(now);
        let start = match start {
            Some(start) => start,
            None => now
                .checked_sub_months(Months::new(DEFAULT_PERIOD_MONTHS))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };

        let mut periods: BTreeMap<(i32, u32), usize> = BTreeMap::new();
        for loan in self.store.list_loans().await? {
            if loan.loaned_at < start || loan.loaned_at > end {
                continue;
            }
            *periods
                .entry((loan.loaned_at.year(), loan.loaned_at.month()))
                .or_default() += 1;
        }

        Ok(periods
            .into_iter()
            .map(|((year, month), total)| PeriodLoanCount {
                year,
                month,
                total,
                period: period_label(year, month),
            })
            .collect())
    }

    /// Most borrowed items. Equal counts keep the order in which the items
    /// first appear in the loan history.
    #[tracing::instrument(skip(self))]
    pub async fn top_borrowed_items(&self, limit: i32) -> LibraryResult<Vec<BorrowedItemCount>> {
        let limit = usize::try_from(limit)
            .ok()
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_TOP_BORROWED_LIMIT);
        let titles: HashMap<ItemId, String> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id, item.title))
            .collect();

        let mut counts: Vec<(ItemId, usize)> = Vec::new();
        for loan in self.store.list_loans().await? {
            match counts.iter_mut().find(|(item_id, _)| *item_id == loan.item_id) {
                Some((_, total)) => *total += 1,
                None => counts.push((loan.item_id, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(counts
            .into_iter()
            .take(limit)
            .map(|(item_id, total_loans)| BorrowedItemCount {
                item_id,
                title: titles.get(&item_id).cloned().unwrap_or_default(),
                total_loans,
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn overdue_loans(&self) -> LibraryResult<Vec<OverdueLoan>> {
        let now = Utc::now();
        let titles: HashMap<ItemId, String> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id, item.title))
            .collect();

        Ok(self
            .store
            .list_loans()
            .await?
            .into_iter()
            .filter(|loan| loan.is_overdue(now))
            .map(|loan| OverdueLoan {
                loan_id: loan.id,
                title: titles.get(&loan.item_id).cloned().unwrap_or_default(),
                item_id: loan.item_id,
                borrower_id: loan.borrower_id,
                loaned_at: loan.loaned_at,
                due_at: loan.due_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod dashboard_tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::api::{CategoryDetails, CategoryLink, ItemDetails, NewCatalogItem, NewLoan};
    use crate::catalog_store::InMemoryCatalogStore;
    use crate::circulation::CirculationService;

    fn book(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 1951,
            publisher: "Gnome Press".to_string(),
            cover_url: None,
            details: ItemDetails::Book {
                author: Some("Isaac Asimov".to_string()),
                isbn: "0-553-29335-4".to_string(),
                page_count: 255,
            },
        }
    }

    fn periodical(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 2023,
            publisher: "Springer Nature".to_string(),
            cover_url: None,
            details: ItemDetails::Periodical {
                issue: "Vol. 615".to_string(),
                issn: "0028-0836".to_string(),
                periodicity: "weekly".to_string(),
            },
        }
    }

    /// Opens and immediately closes a loan starting at the given instant
    async fn historic_loan(store: &InMemoryCatalogStore, item_id: ItemId, loaned_at: DateTime<Utc>) {
        let loan = store
            .open_loan(NewLoan {
                item_id,
                borrower_id: 1,
                loaned_at,
                due_at: loaned_at + Duration::days(15),
            })
            .await
            .unwrap();
        store
            .close_loan(loan.id, loaned_at + Duration::days(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn summary_counts_variants_and_loan_states() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let foundation = store.add_item(book("Foundation")).await.unwrap();
        let robot = store.add_item(book("I, Robot")).await.unwrap();
        store.add_item(periodical("Nature")).await.unwrap();

        let circulation = CirculationService::new(store.clone());
        let returned = circulation.borrow(foundation.id, 1, None).await.unwrap();
        circulation.return_loan(returned.id).await.unwrap();
        circulation.borrow(foundation.id, 2, None).await.unwrap();
        let loaned_at = Utc::now() - Duration::days(20);
        store
            .open_loan(NewLoan {
                item_id: robot.id,
                borrower_id: 3,
                loaned_at,
                due_at: loaned_at + Duration::days(15),
            })
            .await
            .unwrap();

        let summary = DashboardAggregator::new(store)
            .dashboard_summary()
            .await
            .unwrap();
        assert_eq!(
            summary,
            DashboardSummary {
                total_books: 2,
                total_periodicals: 1,
                total_items: 3,
                total_loans: 3,
                active_loans: 2,
                overdue_loans: 1,
            }
        );
    }

    #[tokio::test]
    async fn items_by_category_reports_empty_categories() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let foundation = store.add_item(book("Foundation")).await.unwrap();
        let nature = store.add_item(periodical("Nature")).await.unwrap();
        let fiction = store
            .add_category(CategoryDetails {
                name: "Fiction".to_string(),
                description: "Made up stories".to_string(),
            })
            .await
            .unwrap();
        let poetry = store
            .add_category(CategoryDetails {
                name: "Poetry".to_string(),
                description: "Verse".to_string(),
            })
            .await
            .unwrap();
        for item_id in [foundation.id, nature.id] {
            store
                .link_item(CategoryLink {
                    item_id,
                    category_id: fiction.id,
                })
                .await
                .unwrap();
        }

        let rows = DashboardAggregator::new(store)
            .items_by_category()
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                CategoryItemCount {
                    category_id: fiction.id,
                    category_name: "Fiction".to_string(),
                    total_items: 2,
                },
                CategoryItemCount {
                    category_id: poetry.id,
                    category_name: "Poetry".to_string(),
                    total_items: 0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn loans_by_period_groups_months_inside_inclusive_window() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Foundation")).await.unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();

        historic_loan(&store, item.id, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()).await;
        historic_loan(&store, item.id, start).await;
        historic_loan(&store, item.id, Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap()).await;
        historic_loan(&store, item.id, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()).await;
        historic_loan(&store, item.id, end).await;
        historic_loan(&store, item.id, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()).await;

        let periods = DashboardAggregator::new(store)
            .loans_by_period(Some(start), Some(end))
            .await
            .unwrap();
        assert_eq!(
            periods,
            vec![
                PeriodLoanCount {
                    year: 2024,
                    month: 1,
                    total: 2,
                    period: "2024/01".to_string(),
                },
                PeriodLoanCount {
                    year: 2024,
                    month: 3,
                    total: 2,
                    period: "2024/03".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn loans_by_period_defaults_to_last_six_months() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Foundation")).await.unwrap();
        historic_loan(&store, item.id, Utc::now() - Duration::days(400)).await;
        historic_loan(&store, item.id, Utc::now() - Duration::days(1)).await;

        let periods = DashboardAggregator::new(store)
            .loans_by_period(None, None)
            .await
            .unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].total, 1);
    }

    #[tokio::test]
    async fn top_borrowed_breaks_ties_by_first_loan() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let foundation = store.add_item(book("Foundation")).await.unwrap();
        let robot = store.add_item(book("I, Robot")).await.unwrap();
        let nature = store.add_item(periodical("Nature")).await.unwrap();
        let at = Utc::now() - Duration::days(30);

        historic_loan(&store, robot.id, at).await;
        historic_loan(&store, foundation.id, at).await;
        historic_loan(&store, nature.id, at).await;
        historic_loan(&store, nature.id, at).await;
        historic_loan(&store, foundation.id, at).await;
        historic_loan(&store, nature.id, at).await;

        let aggregator = DashboardAggregator::new(store);
        let ranking: Vec<(ItemId, usize)> = aggregator
            .top_borrowed_items(0)
            .await
            .unwrap()
            .iter()
            .map(|row| (row.item_id, row.total_loans))
            .collect();
        assert_eq!(
            ranking,
            vec![(nature.id, 3), (foundation.id, 2), (robot.id, 1)]
        );

        let top = aggregator.top_borrowed_items(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].title, "Nature");
    }

    /// 1. Loan backdated 20 days with a 15 day term is overdue
    /// 2. After return it no longer shows up
    #[tokio::test]
    async fn overdue_loan_disappears_after_return() {
        let store = Arc::new(InMemoryCatalogStore::default());
        let item = store.add_item(book("Foundation")).await.unwrap();
        let loaned_at = Utc::now() - Duration::days(20);
        let loan = store
            .open_loan(NewLoan {
                item_id: item.id,
                borrower_id: 42,
                loaned_at,
                due_at: loaned_at + Duration::days(15),
            })
            .await
            .unwrap();
        let aggregator = DashboardAggregator::new(store.clone());

        let overdue = aggregator.overdue_loans().await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].loan_id, loan.id);
        assert_eq!(overdue[0].borrower_id, 42);
        assert_eq!(overdue[0].title, "Foundation");

        CirculationService::new(store.clone())
            .return_loan(loan.id)
            .await
            .unwrap();
        assert!(aggregator.overdue_loans().await.unwrap().is_empty());
    }
}
