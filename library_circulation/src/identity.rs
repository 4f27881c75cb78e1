use crate::api::BorrowerId;
use crate::error::{LibraryError, LibraryResult};

/// Header carrying the already authenticated borrower id
pub const BORROWER_ID_HEADER: &str = "X-Borrower-Id";
/// Header carrying the caller role, `admin` or `user`
pub const ROLE_HEADER: &str = "X-Role";

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

/// Caller identity resolved outside of the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Borrower(BorrowerId),
    Admin(BorrowerId),
}

impl Identity {
    /// Builds an identity from raw header values.
    /// A missing borrower id means an anonymous caller whatever the role says.
    pub fn from_header_values(
        borrower_id: Option<&str>,
        role: Option<&str>,
    ) -> LibraryResult<Self> {
        let Some(borrower_id) = borrower_id else {
            return Ok(Identity::Anonymous);
        };
        let borrower_id: BorrowerId = borrower_id
            .trim()
            .parse()
            .map_err(|_| LibraryError::Unauthenticated)?;

        Ok(match role.map(str::trim) {
            Some(role) if role.eq_ignore_ascii_case(ADMIN_ROLE) => Identity::Admin(borrower_id),
            _ => Identity::Borrower(borrower_id),
        })
    }

    pub fn borrower_id(&self) -> Option<BorrowerId> {
        match self {
            Identity::Anonymous => None,
            Identity::Borrower(id) | Identity::Admin(id) => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Admin(_))
    }

    /// Any authenticated caller, admins included
    pub fn require_borrower(&self) -> LibraryResult<BorrowerId> {
        self.borrower_id().ok_or(LibraryError::Unauthenticated)
    }

    pub fn require_admin(&self) -> LibraryResult<BorrowerId> {
        match self {
            Identity::Admin(id) => Ok(*id),
            Identity::Borrower(_) => Err(LibraryError::Forbidden),
            Identity::Anonymous => Err(LibraryError::Unauthenticated),
        }
    }

    /// Header pairs a client sends to present this identity
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Identity::Anonymous => vec![],
            Identity::Borrower(id) => vec![
                (BORROWER_ID_HEADER, id.to_string()),
                (ROLE_HEADER, USER_ROLE.to_string()),
            ],
            Identity::Admin(id) => vec![
                (BORROWER_ID_HEADER, id.to_string()),
                (ROLE_HEADER, ADMIN_ROLE.to_string()),
            ],
        }
    }
}
