use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::{CatalogItem, ItemId, SearchParameters, SearchResult};
use crate::catalog_store::CatalogStore;
use crate::error::LibraryResult;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Title,
    Year,
    Publisher,
    /// Fallback ordering, always ascending
    Id,
}

impl SortKey {
    /// Accepts English and Portuguese key names in any case, anything else sorts by id
    pub fn parse(key: Option<&str>) -> Self {
        match key.map(|key| key.trim().to_lowercase()).as_deref() {
            Some("title") | Some("titulo") => SortKey::Title,
            Some("year") | Some("ano") => SortKey::Year,
            Some("publisher") | Some("editora") => SortKey::Publisher,
            _ => SortKey::Id,
        }
    }

    fn compare(&self, a: &CatalogItem, b: &CatalogItem) -> Ordering {
        match self {
            SortKey::Title => compare_text(&a.title, &b.title),
            SortKey::Year => a.publication_year.cmp(&b.publication_year),
            SortKey::Publisher => compare_text(&a.publisher, &b.publisher),
            SortKey::Id => a.id.cmp(&b.id),
        }
    }
}

/// Case-insensitive order, raw text only breaks ties between spellings
fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Replaces non-positive page and page size with their defaults
pub fn normalize_paging(page: i32, page_size: i32) -> (usize, usize) {
    let page = usize::try_from(page)
        .ok()
        .filter(|page| *page > 0)
        .unwrap_or(DEFAULT_PAGE);
    let page_size = usize::try_from(page_size)
        .ok()
        .filter(|page_size| *page_size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

fn matches_term(item: &CatalogItem, term: &str) -> bool {
    item.searchable_fields()
        .iter()
        .any(|field| field.contains(term))
}

/// Filters, orders and pages an already materialized catalog.
///
/// `category_members` holds the ids linked to the requested category and is
/// only consulted when the parameters carry a category filter.
pub fn search_items(
    mut items: Vec<CatalogItem>,
    category_members: Option<&HashSet<ItemId>>,
    parameters: &SearchParameters,
) -> SearchResult {
    if let Some(term) = parameters
        .term
        .as_deref()
        .filter(|term| !term.trim().is_empty())
    {
        items.retain(|item| matches_term(item, term));
    }
    if let Some(year) = parameters.publication_year {
        items.retain(|item| item.publication_year == year);
    }
    if let Some(available) = parameters.available {
        items.retain(|item| item.available == available);
    }
    if parameters.category_id.is_some() {
        items.retain(|item| category_members.is_some_and(|members| members.contains(&item.id)));
    }

    // Stable sorts below keep id order among equal keys
    items.sort_by_key(|item| item.id);
    let sort_key = SortKey::parse(parameters.sort_by.as_deref());
    if sort_key != SortKey::Id {
        if parameters.ascending {
            items.sort_by(|a, b| sort_key.compare(a, b));
        } else {
            items.sort_by(|a, b| sort_key.compare(b, a));
        }
    }

    let (page, page_size) = normalize_paging(parameters.page, parameters.page_size);
    let total = items.len();
    let total_pages = total.div_ceil(page_size);
    let offset = (page - 1).saturating_mul(page_size);
    let items = items.into_iter().skip(offset).take(page_size).collect();

    SearchResult {
        items,
        total,
        page,
        page_size,
        total_pages,
    }
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn CatalogStore>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn search(&self, parameters: &SearchParameters) -> LibraryResult<SearchResult> {
        let items = self.store.list_items().await?;
        let category_members = match parameters.category_id {
            Some(category_id) => Some(self.store.item_ids_in_category(category_id).await?),
            None => None,
        };
        let result = search_items(items, category_members.as_ref(), parameters);
        tracing::debug!(total = result.total, "Search finished");
        Ok(result)
    }
}
