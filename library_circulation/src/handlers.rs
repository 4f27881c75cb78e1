use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{Error, HttpRequest, HttpResponse};
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{
    BorrowRequest, CatalogItemPatch, CategoryDetails, CategoryId, CategoryItemPath, ItemId,
    LoanId, LoansByPeriodQuery, NewBook, NewPeriodical, ReservationId, ReserveRequest,
    SearchParameters, TopBorrowedQuery,
};
use crate::error::{ErrorKind, LibraryError, LibraryResult};
use crate::identity::{Identity, BORROWER_ID_HEADER, ROLE_HEADER};
use crate::Library;

fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

fn caller(request: &HttpRequest) -> LibraryResult<Identity> {
    Identity::from_header_values(
        header(request, BORROWER_ID_HEADER),
        header(request, ROLE_HEADER),
    )
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns the outcome of a handler into a response, the error message is sent as a json string
fn respond(operation: &str, result: LibraryResult<HttpResponse>) -> HttpResponse {
    match result {
        Ok(response) => response,
        Err(err) => {
            let kind = err.kind();
            if kind == ErrorKind::Infrastructure {
                tracing::error!("{} failed {}", operation, err);
            } else {
                tracing::info!("{} rejected {}", operation, err);
            }
            HttpResponse::build(status_of(kind)).json(err.to_string())
        }
    }
}

fn created<T: serde::Serialize>(location: String, body: T) -> HttpResponse {
    HttpResponse::Created()
        .append_header((LOCATION, location))
        .json(body)
}

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn search(
    library: Data<Arc<Library>>,
    parameters: web::Json<SearchParameters>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let found = library.search.search(&parameters).await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(found))
    }
    .await;
    Ok(respond("Search", result))
}

#[api_v2_operation]
pub async fn list_items(library: Data<Arc<Library>>) -> Result<HttpResponse, Error> {
    let result = async {
        let items = library.catalog.list_items().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(items))
    }
    .await;
    Ok(respond("List items", result))
}

#[api_v2_operation]
pub async fn get_item(
    library: Data<Arc<Library>>,
    item_id: web::Path<ItemId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let item = library.catalog.get_item(item_id.into_inner()).await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(item))
    }
    .await;
    Ok(respond("Get item", result))
}

#[api_v2_operation]
pub async fn patch_item(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    item_id: web::Path<ItemId>,
    patch: web::Json<CatalogItemPatch>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let item = library
            .catalog
            .patch_item(item_id.into_inner(), patch.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(item))
    }
    .await;
    Ok(respond("Patch item", result))
}

#[api_v2_operation]
pub async fn delete_item(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    item_id: web::Path<ItemId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        library.catalog.delete_item(item_id.into_inner()).await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Delete item", result))
}

#[api_v2_operation]
pub async fn item_reservations(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    item_id: web::Path<ItemId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let queue = library
            .reservations
            .reservation_queue(item_id.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(queue))
    }
    .await;
    Ok(respond("Reservation queue", result))
}

#[api_v2_operation]
pub async fn list_books(library: Data<Arc<Library>>) -> Result<HttpResponse, Error> {
    let result = async {
        let books = library.catalog.list_books().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(books))
    }
    .await;
    Ok(respond("List books", result))
}

#[api_v2_operation]
pub async fn add_book(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    book: web::Json<NewBook>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let item = library.catalog.add_book(book.into_inner()).await?;
        Ok::<_, LibraryError>(created(format!("/api/items/{}", item.id), item))
    }
    .await;
    Ok(respond("Add book", result))
}

#[api_v2_operation]
pub async fn list_periodicals(library: Data<Arc<Library>>) -> Result<HttpResponse, Error> {
    let result = async {
        let periodicals = library.catalog.list_periodicals().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(periodicals))
    }
    .await;
    Ok(respond("List periodicals", result))
}

#[api_v2_operation]
pub async fn add_periodical(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    periodical: web::Json<NewPeriodical>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let item = library
            .catalog
            .add_periodical(periodical.into_inner())
            .await?;
        Ok::<_, LibraryError>(created(format!("/api/items/{}", item.id), item))
    }
    .await;
    Ok(respond("Add periodical", result))
}

#[api_v2_operation]
pub async fn list_categories(library: Data<Arc<Library>>) -> Result<HttpResponse, Error> {
    let result = async {
        let categories = library.catalog.list_categories().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(categories))
    }
    .await;
    Ok(respond("List categories", result))
}

#[api_v2_operation]
pub async fn add_category(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    details: web::Json<CategoryDetails>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let category = library.catalog.add_category(details.into_inner()).await?;
        Ok::<_, LibraryError>(created(
            format!("/api/categories/{}", category.id),
            category,
        ))
    }
    .await;
    Ok(respond("Add category", result))
}

#[api_v2_operation]
pub async fn get_category(
    library: Data<Arc<Library>>,
    category_id: web::Path<CategoryId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let category = library
            .catalog
            .get_category(category_id.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(category))
    }
    .await;
    Ok(respond("Get category", result))
}

#[api_v2_operation]
pub async fn update_category(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    category_id: web::Path<CategoryId>,
    details: web::Json<CategoryDetails>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let category = library
            .catalog
            .update_category(category_id.into_inner(), details.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(category))
    }
    .await;
    Ok(respond("Update category", result))
}

#[api_v2_operation]
pub async fn delete_category(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    category_id: web::Path<CategoryId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        library
            .catalog
            .delete_category(category_id.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Delete category", result))
}

#[api_v2_operation]
pub async fn category_items(
    library: Data<Arc<Library>>,
    category_id: web::Path<CategoryId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let items = library
            .catalog
            .items_in_category(category_id.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(items))
    }
    .await;
    Ok(respond("Category items", result))
}

#[api_v2_operation]
pub async fn link_item(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    path: web::Path<CategoryItemPath>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        library
            .catalog
            .link_item(path.category_id, path.item_id)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Link item", result))
}

#[api_v2_operation]
pub async fn unlink_item(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    path: web::Path<CategoryItemPath>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        library
            .catalog
            .unlink_item(path.category_id, path.item_id)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Unlink item", result))
}

#[api_v2_operation]
pub async fn list_loans(
    library: Data<Arc<Library>>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let result = async {
        let borrower_id = caller(&request)?.require_borrower()?;
        let loans = library
            .circulation
            .list_borrower_loans(borrower_id)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(loans))
    }
    .await;
    Ok(respond("List loans", result))
}

#[api_v2_operation]
pub async fn borrow(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    body: web::Json<BorrowRequest>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let borrower_id = caller(&request)?.require_borrower()?;
        let loan = library
            .circulation
            .borrow(body.item_id, borrower_id, body.term_days)
            .await?;
        Ok::<_, LibraryError>(created(format!("/api/loans/{}", loan.id), loan))
    }
    .await;
    Ok(respond("Borrow", result))
}

#[api_v2_operation]
pub async fn return_loan(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    loan_id: web::Path<LoanId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_borrower()?;
        library
            .circulation
            .return_loan(loan_id.into_inner())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Return", result))
}

#[api_v2_operation]
pub async fn list_reservations(
    library: Data<Arc<Library>>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let result = async {
        let borrower_id = caller(&request)?.require_borrower()?;
        let reservations = library
            .reservations
            .list_my_reservations(borrower_id)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(reservations))
    }
    .await;
    Ok(respond("List reservations", result))
}

#[api_v2_operation]
pub async fn reserve(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    body: web::Json<ReserveRequest>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let borrower_id = caller(&request)?.require_borrower()?;
        let reservation = library
            .reservations
            .reserve(body.item_id, borrower_id)
            .await?;
        Ok::<_, LibraryError>(created(
            format!("/api/reservations/{}", reservation.id),
            reservation,
        ))
    }
    .await;
    Ok(respond("Reserve", result))
}

#[api_v2_operation]
pub async fn cancel_reservation(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    reservation_id: web::Path<ReservationId>,
) -> Result<HttpResponse, Error> {
    let result = async {
        let borrower_id = caller(&request)?.require_borrower()?;
        library
            .reservations
            .cancel_reservation(reservation_id.into_inner(), borrower_id)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::NoContent().finish())
    }
    .await;
    Ok(respond("Cancel reservation", result))
}

#[api_v2_operation]
pub async fn dashboard_summary(
    library: Data<Arc<Library>>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let summary = library.dashboard.dashboard_summary().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(summary))
    }
    .await;
    Ok(respond("Dashboard summary", result))
}

#[api_v2_operation]
pub async fn items_by_category(
    library: Data<Arc<Library>>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let rows = library.dashboard.items_by_category().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(rows))
    }
    .await;
    Ok(respond("Items by category", result))
}

#[api_v2_operation]
pub async fn loans_by_period(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    query: web::Query<LoansByPeriodQuery>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let periods = library
            .dashboard
            .loans_by_period(query.start, query.end)
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(periods))
    }
    .await;
    Ok(respond("Loans by period", result))
}

#[api_v2_operation]
pub async fn top_borrowed(
    library: Data<Arc<Library>>,
    request: HttpRequest,
    query: web::Query<TopBorrowedQuery>,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let ranking = library
            .dashboard
            .top_borrowed_items(query.limit.unwrap_or_default())
            .await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(ranking))
    }
    .await;
    Ok(respond("Top borrowed", result))
}

#[api_v2_operation]
pub async fn overdue_loans(
    library: Data<Arc<Library>>,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let result = async {
        caller(&request)?.require_admin()?;
        let overdue = library.dashboard.overdue_loans().await?;
        Ok::<_, LibraryError>(HttpResponse::Ok().json(overdue))
    }
    .await;
    Ok(respond("Overdue loans", result))
}
