pub mod auth;
pub mod error;
pub mod matches;
pub mod messages;
pub mod middleware;
pub mod telegram;
pub mod users;

pub use error::{ApiError, ApiResult};

/// Run a blocking store call off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, ember_db::StoreError> + Send + 'static,
    T: Send + 'static,
{
    let joined = tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!("spawn_blocking join error: {e}");
        ApiError::Internal
    })?;
    Ok(joined?)
}
