//! Uniform per-stage timeout.

use crate::{Stage, StageError};
use std::future::Future;
use std::time::Duration;

/// Race `future` against a single timer of `after`.
///
/// If the timer elapses first the stage fails with a timeout-tagged
/// [`StageError`] and the future is dropped. The timer is owned by this call
/// and is dropped on both paths, so nothing fires after it returns.
pub async fn with_timeout<F>(stage: Stage, after: Duration, future: F) -> Result<F::Output, StageError>
where
    F: Future,
{
    match tokio::time::timeout(after, future).await {
        Ok(output) => Ok(output),
        Err(_) => {
            tracing::warn!(stage = %stage, timeout_ms = after.as_millis() as u64, "Handshake stage timed out");
            Err(StageError::timeout(stage, after))
        }
    }
}
