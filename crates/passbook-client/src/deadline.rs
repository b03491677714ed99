//! Deadlines on station calls

use passbook_core::StationError;
use std::future::Future;
use std::time::Duration;

/// Run a station call under `timeout`
///
/// Elapsed deadlines (ours or the transport's) become
/// [`StationError::Timeout`]: an unknown outcome, never a rejection.
pub(crate) async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, StationError>
where
    F: Future<Output = Result<T, StationError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Err(StationError::Timeout(_))) | Err(_) => Err(StationError::Timeout(timeout)),
        Ok(result) => result,
    }
}
