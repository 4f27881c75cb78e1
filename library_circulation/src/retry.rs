use std::future::Future;

use crate::catalog_store::CatalogStoreError;

/// Runs an atomic store operation, repeating it once if the first attempt
/// hit a transient store failure.
pub async fn retry_once<T, F, Fut>(operation: &str, attempt: F) -> Result<T, CatalogStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CatalogStoreError>>,
{
    retry_once_if(operation, CatalogStoreError::is_transient, attempt).await
}

/// Runs `attempt`, repeating it once when the first error satisfies `should_retry`.
/// The outcome of the second attempt is returned as is.
pub async fn retry_once_if<T, E, P, F, Fut>(
    operation: &str,
    should_retry: P,
    mut attempt: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match attempt().await {
        Err(err) if should_retry(&err) => {
            tracing::warn!(operation, error = %err, "Transient store failure, retrying once");
            attempt().await
        }
        result => result,
    }
}
