//! Remote call errors and helpers shared by collectors and change handlers.

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use thiserror::Error;

use crate::change::{ChangeError, ChangeErrorKind};

/// Default timeout for a single collector or handler call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by collectors and change handlers.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Remote system temporarily unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The remote system refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Conflict with the current remote state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemoteError {
    /// Timeouts and unavailability may go away on retry; the rest will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. } | RemoteError::Unavailable(_))
    }
}

impl From<RemoteError> for ChangeError {
    fn from(e: RemoteError) -> Self {
        let kind = match &e {
            RemoteError::Timeout { .. } => ChangeErrorKind::Timeout,
            RemoteError::Unavailable(_) => ChangeErrorKind::Transient,
            _ => ChangeErrorKind::Rejected,
        };
        ChangeError::new(kind, e.to_string())
    }
}

/// Run a remote call with a deadline, mapping expiry to [`RemoteError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, after: Duration, fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

/// Run one remote call per item concurrently and wait for all of them.
/// Collectors use it to fetch per-resource details after listing keys.
///
/// Results keep the order of `items`. The first failure aborts the wait and
/// is returned as-is.
pub async fn fan_out<I, T, F, Fut>(items: I, f: F) -> Result<Vec<T>, RemoteError>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    try_join_all(items.into_iter().map(f)).await
}
