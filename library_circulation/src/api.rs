use chrono::{DateTime, Utc};
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type ItemId = i32;
pub type CategoryId = i32;
pub type LoanId = i32;
pub type ReservationId = i32;
pub type BorrowerId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A single circulating unit of the collection
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    pub publication_year: i32,
    pub publisher: String,
    /// True iff no open loan references this item
    pub available: bool,
    pub cover_url: Option<String>,
    pub details: ItemDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Variant specific part of a catalog item
pub enum ItemDetails {
    Book {
        author: Option<String>,
        isbn: String,
        page_count: i32,
    },
    Periodical {
        issue: String,
        issn: String,
        periodicity: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Book,
    Periodical,
}

impl ItemDetails {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemDetails::Book { .. } => ItemKind::Book,
            ItemDetails::Periodical { .. } => ItemKind::Periodical,
        }
    }
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Book => "book",
            ItemKind::Periodical => "periodical",
        }
    }
}

impl CatalogItem {
    /// Fields a search term is matched against, title first
    pub fn searchable_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.title.as_str()];
        match &self.details {
            ItemDetails::Book { author, .. } => fields.extend(author.as_deref()),
            ItemDetails::Periodical { issue, .. } => fields.push(issue.as_str()),
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
/// Payload used to add a book to the catalog
pub struct NewBook {
    pub title: String,
    pub publication_year: i32,
    pub publisher: String,
    pub cover_url: Option<String>,
    pub author: Option<String>,
    pub isbn: String,
    pub page_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
/// Payload used to add a periodical to the catalog
pub struct NewPeriodical {
    pub title: String,
    pub publication_year: i32,
    pub publisher: String,
    pub cover_url: Option<String>,
    pub issue: String,
    pub issn: String,
    pub periodicity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Item as handed to the store before an id is assigned
pub struct NewCatalogItem {
    pub title: String,
    pub publication_year: i32,
    pub publisher: String,
    pub cover_url: Option<String>,
    pub details: ItemDetails,
}

impl From<NewBook> for NewCatalogItem {
    fn from(book: NewBook) -> Self {
        Self {
            title: book.title,
            publication_year: book.publication_year,
            publisher: book.publisher,
            cover_url: book.cover_url,
            details: ItemDetails::Book {
                author: book.author,
                isbn: book.isbn,
                page_count: book.page_count,
            },
        }
    }
}

impl From<NewPeriodical> for NewCatalogItem {
    fn from(periodical: NewPeriodical) -> Self {
        Self {
            title: periodical.title,
            publication_year: periodical.publication_year,
            publisher: periodical.publisher,
            cover_url: periodical.cover_url,
            details: ItemDetails::Periodical {
                issue: periodical.issue,
                issn: periodical.issn,
                periodicity: periodical.periodicity,
            },
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
/// Merge patch over the descriptive fields of an item.
/// Variant fields must belong to the item's own variant.
pub struct CatalogItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodicity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct CategoryDetails {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Apiv2Schema)]
pub struct CategoryLink {
    pub item_id: ItemId,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct CategoryItemPath {
    pub category_id: CategoryId,
    pub item_id: ItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct Loan {
    pub id: LoanId,
    pub item_id: ItemId,
    pub borrower_id: BorrowerId,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub item_id: ItemId,
    pub borrower_id: BorrowerId,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct Reservation {
    pub id: ReservationId,
    pub item_id: ItemId,
    pub borrower_id: BorrowerId,
    pub reserved_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub item_id: ItemId,
    pub borrower_id: BorrowerId,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct BorrowRequest {
    pub item_id: ItemId,
    /// Loan term, non-positive or missing values fall back to the default term
    pub term_days: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct ReserveRequest {
    pub item_id: ItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
/// A loan of the borrower together with the borrowed item's title
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub title: String,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct ReservationSummary {
    pub reservation_id: ReservationId,
    pub item_id: ItemId,
    pub title: String,
    pub reserved_at: DateTime<Utc>,
}

fn default_ascending() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
/// Query accepted by the search engine, every filter is optional
pub struct SearchParameters {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
    #[serde(default)]
    pub page: i32,
    #[serde(default)]
    pub page_size: i32,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            term: None,
            publication_year: None,
            available: None,
            category_id: None,
            sort_by: None,
            ascending: true,
            page: 1,
            page_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub items: Vec<CatalogItem>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct DashboardSummary {
    pub total_books: usize,
    pub total_periodicals: usize,
    pub total_items: usize,
    pub total_loans: usize,
    pub active_loans: usize,
    pub overdue_loans: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct CategoryItemCount {
    pub category_id: CategoryId,
    pub category_name: String,
    pub total_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct PeriodLoanCount {
    pub year: i32,
    pub month: u32,
    pub total: usize,
    /// `YYYY/MM`
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct BorrowedItemCount {
    pub item_id: ItemId,
    pub title: String,
    pub total_loans: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct OverdueLoan {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub title: String,
    pub borrower_id: BorrowerId,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct LoansByPeriodQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Apiv2Schema)]
pub struct TopBorrowedQuery {
    pub limit: Option<i32>,
}
