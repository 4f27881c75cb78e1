use anyhow::Context;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;

use crate::api::{
    BorrowRequest, BorrowedItemCount, CatalogItem, CatalogItemPatch, Category, CategoryDetails,
    CategoryId, CategoryItemCount, DashboardSummary, ItemId, Loan, LoanId, LoanSummary,
    LoansByPeriodQuery, NewBook, NewPeriodical, OverdueLoan, PeriodLoanCount, Reservation,
    ReservationId, ReservationSummary, ReserveRequest, SearchParameters, SearchResult,
    TopBorrowedQuery,
};
use crate::identity::Identity;

/// Non success answer of the server, reachable through `anyhow::Error::downcast_ref`
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed with status {status}: {message}")]
pub struct ApiError {
    pub operation: &'static str,
    pub status: StatusCode,
    pub message: String,
}

pub struct LibraryClient {
    url: String,
    identity: Identity,
    client: ClientWithMiddleware,
}

impl LibraryClient {
    pub fn new(url: &str, identity: Identity) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            identity,
            client,
        })
    }

    /// Same server, different caller
    pub fn as_identity(&self, identity: Identity) -> Self {
        Self {
            url: self.url.clone(),
            identity,
            client: self.client.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.identity.headers().into_iter().fold(
            self.client.request(method, format!("{}{}", self.url, path)),
            |request, (name, value)| request.header(name, value),
        )
    }

    async fn checked(
        operation: &'static str,
        request: RequestBuilder,
    ) -> anyhow::Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{operation} request failed"))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message: String = response.json().await.unwrap_or_default();
        Err(ApiError {
            operation,
            status,
            message,
        }
        .into())
    }

    async fn fetch<T: DeserializeOwned>(
        operation: &'static str,
        request: RequestBuilder,
    ) -> anyhow::Result<T> {
        Self::checked(operation, request)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse {operation} response"))
    }

    /// Calls GET /health endpoint
    pub async fn health(&self) -> anyhow::Result<()> {
        Self::checked("Health", self.request(reqwest::Method::GET, "/health")).await?;
        Ok(())
    }

    /// Calls POST /api/search endpoint
    pub async fn search(&self, parameters: &SearchParameters) -> anyhow::Result<SearchResult> {
        Self::fetch(
            "Search",
            self.request(reqwest::Method::POST, "/api/search")
                .json(parameters),
        )
        .await
    }

    /// Calls GET /api/items endpoint
    pub async fn list_items(&self) -> anyhow::Result<Vec<CatalogItem>> {
        Self::fetch("List items", self.request(reqwest::Method::GET, "/api/items")).await
    }

    /// Calls GET /api/items/{item_id} endpoint
    /// Returns None if the item is not in the catalog
    pub async fn get_item(&self, item_id: ItemId) -> anyhow::Result<Option<CatalogItem>> {
        let result = Self::fetch(
            "Get item",
            self.request(reqwest::Method::GET, &format!("/api/items/{item_id}")),
        )
        .await;
        match result {
            Err(err)
                if err
                    .downcast_ref::<ApiError>()
                    .is_some_and(|api_error| api_error.status == StatusCode::NOT_FOUND) =>
            {
                Ok(None)
            }
            other => other.map(Some),
        }
    }

    /// Calls PATCH /api/items/{item_id} endpoint
    pub async fn patch_item(
        &self,
        item_id: ItemId,
        patch: &CatalogItemPatch,
    ) -> anyhow::Result<CatalogItem> {
        Self::fetch(
            "Patch item",
            self.request(reqwest::Method::PATCH, &format!("/api/items/{item_id}"))
                .json(patch),
        )
        .await
    }

    /// Calls DELETE /api/items/{item_id} endpoint
    pub async fn delete_item(&self, item_id: ItemId) -> anyhow::Result<()> {
        Self::checked(
            "Delete item",
            self.request(reqwest::Method::DELETE, &format!("/api/items/{item_id}")),
        )
        .await?;
        Ok(())
    }

    /// Calls GET /api/items/{item_id}/reservations endpoint
    pub async fn reservation_queue(&self, item_id: ItemId) -> anyhow::Result<Vec<Reservation>> {
        Self::fetch(
            "Reservation queue",
            self.request(
                reqwest::Method::GET,
                &format!("/api/items/{item_id}/reservations"),
            ),
        )
        .await
    }

    /// Calls GET /api/books endpoint
    pub async fn list_books(&self) -> anyhow::Result<Vec<CatalogItem>> {
        Self::fetch("List books", self.request(reqwest::Method::GET, "/api/books")).await
    }

    /// Calls POST /api/books endpoint
    pub async fn add_book(&self, book: &NewBook) -> anyhow::Result<CatalogItem> {
        Self::fetch(
            "Add book",
            self.request(reqwest::Method::POST, "/api/books").json(book),
        )
        .await
    }

    /// Calls GET /api/periodicals endpoint
    pub async fn list_periodicals(&self) -> anyhow::Result<Vec<CatalogItem>> {
        Self::fetch(
            "List periodicals",
            self.request(reqwest::Method::GET, "/api/periodicals"),
        )
        .await
    }

    /// Calls POST /api/periodicals endpoint
    pub async fn add_periodical(&self, periodical: &NewPeriodical) -> anyhow::Result<CatalogItem> {
        Self::fetch(
            "Add periodical",
            self.request(reqwest::Method::POST, "/api/periodicals")
                .json(periodical),
        )
        .await
    }

    /// Calls GET /api/categories endpoint
    pub async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        Self::fetch(
            "List categories",
            self.request(reqwest::Method::GET, "/api/categories"),
        )
        .await
    }

    /// Calls POST /api/categories endpoint
    pub async fn add_category(&self, details: &CategoryDetails) -> anyhow::Result<Category> {
        Self::fetch(
            "Add category",
            self.request(reqwest::Method::POST, "/api/categories")
                .json(details),
        )
        .await
    }

    /// Calls GET /api/categories/{category_id} endpoint
    pub async fn get_category(&self, category_id: CategoryId) -> anyhow::Result<Category> {
        Self::fetch(
            "Get category",
            self.request(
                reqwest::Method::GET,
                &format!("/api/categories/{category_id}"),
            ),
        )
        .await
    }

    /// Calls PUT /api/categories/{category_id} endpoint
    pub async fn update_category(
        &self,
        category_id: CategoryId,
        details: &CategoryDetails,
    ) -> anyhow::Result<Category> {
        Self::fetch(
            "Update category",
            self.request(
                reqwest::Method::PUT,
                &format!("/api/categories/{category_id}"),
            )
            .json(details),
        )
        .await
    }

    /// Calls DELETE /api/categories/{category_id} endpoint
    pub async fn delete_category(&self, category_id: CategoryId) -> anyhow::Result<()> {
        Self::checked(
            "Delete category",
            self.request(
                reqwest::Method::DELETE,
                &format!("/api/categories/{category_id}"),
            ),
        )
        .await?;
        Ok(())
    }

    /// Calls GET /api/categories/{category_id}/items endpoint
    pub async fn items_in_category(
        &self,
        category_id: CategoryId,
    ) -> anyhow::Result<Vec<CatalogItem>> {
        Self::fetch(
            "Category items",
            self.request(
                reqwest::Method::GET,
                &format!("/api/categories/{category_id}/items"),
            ),
        )
        .await
    }

    /// Calls POST /api/categories/{category_id}/items/{item_id} endpoint
    pub async fn link_item(&self, category_id: CategoryId, item_id: ItemId) -> anyhow::Result<()> {
        Self::checked(
            "Link item",
            self.request(
                reqwest::Method::POST,
                &format!("/api/categories/{category_id}/items/{item_id}"),
            ),
        )
        .await?;
        Ok(())
    }

    /// Calls DELETE /api/categories/{category_id}/items/{item_id} endpoint
    pub async fn unlink_item(
        &self,
        category_id: CategoryId,
        item_id: ItemId,
    ) -> anyhow::Result<()> {
        Self::checked(
            "Unlink item",
            self.request(
                reqwest::Method::DELETE,
                &format!("/api/categories/{category_id}/items/{item_id}"),
            ),
        )
        .await?;
        Ok(())
    }

    /// Calls GET /api/loans endpoint
    pub async fn list_loans(&self) -> anyhow::Result<Vec<LoanSummary>> {
        Self::fetch("List loans", self.request(reqwest::Method::GET, "/api/loans")).await
    }

    /// Calls POST /api/loans endpoint
    pub async fn borrow(&self, item_id: ItemId, term_days: Option<i32>) -> anyhow::Result<Loan> {
        Self::fetch(
            "Borrow",
            self.request(reqwest::Method::POST, "/api/loans")
                .json(&BorrowRequest { item_id, term_days }),
        )
        .await
    }

    /// Calls POST /api/loans/{loan_id}/return endpoint
    pub async fn return_loan(&self, loan_id: LoanId) -> anyhow::Result<()> {
        Self::checked(
            "Return",
            self.request(
                reqwest::Method::POST,
                &format!("/api/loans/{loan_id}/return"),
            ),
        )
        .await?;
        Ok(())
    }

    /// Calls GET /api/reservations endpoint
    pub async fn list_reservations(&self) -> anyhow::Result<Vec<ReservationSummary>> {
        Self::fetch(
            "List reservations",
            self.request(reqwest::Method::GET, "/api/reservations"),
        )
        .await
    }

    /// Calls POST /api/reservations endpoint
    pub async fn reserve(&self, item_id: ItemId) -> anyhow::Result<Reservation> {
        Self::fetch(
            "Reserve",
            self.request(reqwest::Method::POST, "/api/reservations")
                .json(&ReserveRequest { item_id }),
        )
        .await
    }

    /// Calls DELETE /api/reservations/{reservation_id} endpoint
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> anyhow::Result<()> {
        Self::checked(
            "Cancel reservation",
            self.request(
                reqwest::Method::DELETE,
                &format!("/api/reservations/{reservation_id}"),
            ),
        )
        .await?;
        Ok(())
    }

    /// Calls GET /api/dashboard/summary endpoint
    pub async fn dashboard_summary(&self) -> anyhow::Result<DashboardSummary> {
        Self::fetch(
            "Dashboard summary",
            self.request(reqwest::Method::GET, "/api/dashboard/summary"),
        )
        .await
    }

    /// Calls GET /api/dashboard/items-by-category endpoint
    pub async fn items_by_category(&self) -> anyhow::Result<Vec<CategoryItemCount>> {
        Self::fetch(
            "Items by category",
            self.request(reqwest::Method::GET, "/api/dashboard/items-by-category"),
        )
        .await
    }

    /// Calls GET /api/dashboard/loans-by-period endpoint
    pub async fn loans_by_period(
        &self,
        query: &LoansByPeriodQuery,
    ) -> anyhow::Result<Vec<PeriodLoanCount>> {
        Self::fetch(
            "Loans by period",
            self.request(reqwest::Method::GET, "/api/dashboard/loans-by-period")
                .query(query),
        )
        .await
    }

    /// Calls GET /api/dashboard/top-borrowed endpoint
    pub async fn top_borrowed_items(
        &self,
        limit: Option<i32>,
    ) -> anyhow::Result<Vec<BorrowedItemCount>> {
        Self::fetch(
            "Top borrowed",
            self.request(reqwest::Method::GET, "/api/dashboard/top-borrowed")
                .query(&TopBorrowedQuery { limit }),
        )
        .await
    }

    /// Calls GET /api/dashboard/overdue-loans endpoint
    pub async fn overdue_loans(&self) -> anyhow::Result<Vec<OverdueLoan>> {
        Self::fetch(
            "Overdue loans",
            self.request(reqwest::Method::GET, "/api/dashboard/overdue-loans"),
        )
        .await
    }
}
