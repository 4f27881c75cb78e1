use crate::api::{BorrowerId, CategoryId, ItemId, LoanId, ReservationId};
use crate::catalog_store::CatalogStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Coarse classification of a [`LibraryError`], used by the transport layer
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Unauthenticated,
    Forbidden,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
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

    #[error("Item {0} is available, no reservation needed")]
    ItemAlreadyAvailable(ItemId),

    #[error("Borrower {borrower_id} already holds an active reservation for item {item_id}")]
    DuplicateReservation {
        item_id: ItemId,
        borrower_id: BorrowerId,
    },

    #[error("Item {item_id} already linked to category {category_id}")]
    DuplicateCategoryLink {
        item_id: ItemId,
        category_id: CategoryId,
    },

    #[error("Item {0} has loan history and cannot be deleted")]
    ItemHasLoanHistory(ItemId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Caller is not allowed to perform this operation")]
    Forbidden,

    #[error("Catalog store failure: {0}")]
    Infrastructure(CatalogStoreError),
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LibraryError::ItemNotFound(_)
            | LibraryError::LoanNotFound(_)
            | LibraryError::CategoryNotFound(_)
            | LibraryError::ReservationNotFound(_)
            | LibraryError::CategoryLinkNotFound { .. } => ErrorKind::NotFound,
            LibraryError::ItemUnavailable(_)
            | LibraryError::ItemAlreadyAvailable(_)
            | LibraryError::DuplicateReservation { .. }
            | LibraryError::DuplicateCategoryLink { .. }
            | LibraryError::ItemHasLoanHistory(_) => ErrorKind::Conflict,
            LibraryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LibraryError::Unauthenticated => ErrorKind::Unauthenticated,
            LibraryError::Forbidden => ErrorKind::Forbidden,
            LibraryError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<CatalogStoreError> for LibraryError {
    fn from(err: CatalogStoreError) -> Self {
        match err {
            CatalogStoreError::ItemNotFound(id) => LibraryError::ItemNotFound(id),
            CatalogStoreError::LoanNotFound(id) => LibraryError::LoanNotFound(id),
            CatalogStoreError::CategoryNotFound(id) => LibraryError::CategoryNotFound(id),
            CatalogStoreError::ReservationNotFound(id) => LibraryError::ReservationNotFound(id),
            CatalogStoreError::CategoryLinkNotFound {
                item_id,
                category_id,
            } => LibraryError::CategoryLinkNotFound {
                item_id,
                category_id,
            },
            CatalogStoreError::ItemUnavailable(id) => LibraryError::ItemUnavailable(id),
            CatalogStoreError::ItemAlreadyAvailable(id) => LibraryError::ItemAlreadyAvailable(id),
            CatalogStoreError::DuplicateReservation {
                item_id,
                borrower_id,
            } => LibraryError::DuplicateReservation {
                item_id,
                borrower_id,
            },
            CatalogStoreError::DuplicateCategoryLink {
                item_id,
                category_id,
            } => LibraryError::DuplicateCategoryLink {
                item_id,
                category_id,
            },
            CatalogStoreError::ItemHasLoanHistory(id) => LibraryError::ItemHasLoanHistory(id),
            other => LibraryError::Infrastructure(other),
        }
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;

#[cfg(test)]
mod library_error_tests {
    use super::*;

    #[test]
    fn store_business_errors_keep_their_meaning() {
        let err: LibraryError = CatalogStoreError::ItemUnavailable(3).into();
        assert!(matches!(err, LibraryError::ItemUnavailable(3)));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: LibraryError = CatalogStoreError::LoanNotFound(9).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn store_failures_become_infrastructure_errors() {
        let err: LibraryError = CatalogStoreError::Other("boom".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
