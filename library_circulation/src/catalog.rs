use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::api::{
    CatalogItem, CatalogItemPatch, Category, CategoryDetails, CategoryId, CategoryLink, ItemDetails,
    ItemId, ItemKind, NewBook, NewCatalogItem, NewPeriodical,
};
use crate::catalog_store::{CatalogStore, CatalogStoreError};
use crate::error::{LibraryError, LibraryResult};

const COMMON_FIELDS: &[&str] = &["title", "publication_year", "publisher", "cover_url"];
const BOOK_FIELDS: &[&str] = &["author", "isbn", "page_count"];
const PERIODICAL_FIELDS: &[&str] = &["issue", "issn", "periodicity"];

fn require_non_blank(field: &str, value: &str) -> LibraryResult<()> {
    if value.trim().is_empty() {
        return Err(LibraryError::InvalidArgument(format!(
            "{field} must not be blank"
        )));
    }
    Ok(())
}

fn validate(title: &str, details: &ItemDetails) -> LibraryResult<()> {
    require_non_blank("title", title)?;
    match details {
        ItemDetails::Book { isbn, .. } => require_non_blank("isbn", isbn),
        ItemDetails::Periodical { issn, .. } => require_non_blank("issn", issn),
    }
}

/// Turns a flat item patch into a merge patch shaped like a serialized
/// [`CatalogItem`], with variant fields routed under `details`
fn merge_document(kind: ItemKind, patch: &CatalogItemPatch) -> LibraryResult<Value> {
    let variant_fields = match kind {
        ItemKind::Book => BOOK_FIELDS,
        ItemKind::Periodical => PERIODICAL_FIELDS,
    };
    let Value::Object(fields) = json!(patch) else {
        return Err(LibraryError::InvalidArgument(
            "Item patch must be an object".to_string(),
        ));
    };

    let mut root = Map::new();
    let mut details = Map::new();
    for (field, value) in fields {
        if COMMON_FIELDS.contains(&field.as_str()) {
            root.insert(field, value);
        } else if variant_fields.contains(&field.as_str()) {
            details.insert(field, value);
        } else {
            return Err(LibraryError::InvalidArgument(format!(
                "Field {field} does not apply to a {}",
                kind.as_str()
            )));
        }
    }
    if !details.is_empty() {
        root.insert("details".to_string(), Value::Object(details));
    }
    Ok(Value::Object(root))
}

/// Administrative side of the catalog: items, categories and their links
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_book(&self, book: NewBook) -> LibraryResult<CatalogItem> {
        self.add_item(book.into()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_periodical(&self, periodical: NewPeriodical) -> LibraryResult<CatalogItem> {
        self.add_item(periodical.into()).await
    }

    async fn add_item(&self, item: NewCatalogItem) -> LibraryResult<CatalogItem> {
        validate(&item.title, &item.details)?;
        let item = self.store.add_item(item).await?;
        tracing::info!(item_id = item.id, kind = item.details.kind().as_str(), "Item added");
        Ok(item)
    }

    pub async fn get_item(&self, item_id: ItemId) -> LibraryResult<CatalogItem> {
        Ok(self.store.get_item(item_id).await?)
    }

    pub async fn list_items(&self) -> LibraryResult<Vec<CatalogItem>> {
        Ok(self.store.list_items().await?)
    }

    pub async fn list_books(&self) -> LibraryResult<Vec<CatalogItem>> {
        self.list_kind(ItemKind::Book).await
    }

    pub async fn list_periodicals(&self) -> LibraryResult<Vec<CatalogItem>> {
        self.list_kind(ItemKind::Periodical).await
    }

    async fn list_kind(&self, kind: ItemKind) -> LibraryResult<Vec<CatalogItem>> {
        Ok(self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter(|item| item.details.kind() == kind)
            .collect())
    }

    /// Applies a merge patch to the descriptive fields of an item.
    /// The availability flag is never touched.
    #[tracing::instrument(skip(self))]
    pub async fn patch_item(
        &self,
        item_id: ItemId,
        patch: CatalogItemPatch,
    ) -> LibraryResult<CatalogItem> {
        let item = self.store.get_item(item_id).await?;
        let document = merge_document(item.details.kind(), &patch)?;

        let mut patched = json!(item);
        json_patch::merge(&mut patched, &document);
        let patched: CatalogItem =
            serde_json::from_value(patched).map_err(CatalogStoreError::from)?;
        validate(&patched.title, &patched.details)?;

        let updated = self.store.update_item(&patched).await?;
        tracing::info!("Item patched");
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_item(&self, item_id: ItemId) -> LibraryResult<()> {
        self.store.delete_item(item_id).await?;
        tracing::info!("Item deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_category(&self, details: CategoryDetails) -> LibraryResult<Category> {
        require_non_blank("name", &details.name)?;
        Ok(self.store.add_category(details).await?)
    }

    pub async fn get_category(&self, category_id: CategoryId) -> LibraryResult<Category> {
        Ok(self.store.get_category(category_id).await?)
    }

    pub async fn list_categories(&self) -> LibraryResult<Vec<Category>> {
        Ok(self.store.list_categories().await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_category(
        &self,
        category_id: CategoryId,
        details: CategoryDetails,
    ) -> LibraryResult<Category> {
        require_non_blank("name", &details.name)?;
        Ok(self.store.update_category(category_id, details).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_category(&self, category_id: CategoryId) -> LibraryResult<()> {
        Ok(self.store.delete_category(category_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn link_item(&self, category_id: CategoryId, item_id: ItemId) -> LibraryResult<()> {
        Ok(self
            .store
            .link_item(CategoryLink {
                item_id,
                category_id,
            })
            .await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn unlink_item(&self, category_id: CategoryId, item_id: ItemId) -> LibraryResult<()> {
        Ok(self
            .store
            .unlink_item(CategoryLink {
                item_id,
                category_id,
            })
            .await?)
    }

    /// Items linked to the category, in id order
    pub async fn items_in_category(
        &self,
        category_id: CategoryId,
    ) -> LibraryResult<Vec<CatalogItem>> {
        self.store.get_category(category_id).await?;
        let members = self.store.item_ids_in_category(category_id).await?;
        Ok(self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter(|item| members.contains(&item.id))
            .collect())
    }
}
