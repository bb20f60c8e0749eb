//! Cancellable command execution.
//!
//! Commands run as futures raced against a `CancellationToken` (triggered,
//! for example, by a client disconnect). When the token fires first the
//! command future is dropped; any cursor it had pinned is unregistered by
//! the pin's drop, so nothing stays locked.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CursorError, Result};

/// Run `command` unless `cancel_token` fires first.
///
/// # Returns
/// * `Ok(T)` if the command completed successfully
/// * `Err(CursorError::Cancelled)` if cancelled
/// * `Err(...)` for other errors
pub async fn run_killable<F, T>(
    label: &str,
    cancel_token: &CancellationToken,
    command: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            warn!("{} interrupted by cancellation", label);
            Err(CursorError::Cancelled(format!("{label} cancelled")).into())
        }
        result = command => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_without_cancel() {
        let token = CancellationToken::new();
        let value = run_killable("test", &token, async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_command() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = run_killable("slow", &token, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code_name(), "Interrupted");
    }
}
