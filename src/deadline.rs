//! Deadline racing for long mailbox operations

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::errors::{AppError, AppResult};

/// Race `operation` against `limit`
///
/// When the timer wins, the operation future is dropped and a
/// `Timeout` error carrying `message` is returned. Nothing is retried.
pub async fn with_deadline<T, F>(limit: Duration, message: &str, operation: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match timeout(limit, operation).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(limit_ms = limit.as_millis() as u64, "{message}");
            Err(AppError::Timeout(message.to_owned()))
        }
    }
}

/// Message reported when a fetch exceeds its budget
pub fn fetch_timeout_message(limit: Duration) -> String {
    format!(
        "email fetch exceeded {}s; try a smaller limit or narrower filters",
        limit.as_secs()
    )
}

/// Message reported when folder listing exceeds its budget
pub fn folder_list_timeout_message(limit: Duration) -> String {
    format!("folder listing exceeded {}s", limit.as_secs())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{fetch_timeout_message, with_deadline};
    use crate::errors::AppError;

    #[tokio::test(start_paused = true)]
    async fn pending_operation_times_out() {
        let out: Result<(), _> = with_deadline(
            Duration::from_secs(90),
            "too slow",
            std::future::pending(),
        )
        .await;
        match out {
            Err(AppError::Timeout(msg)) => assert_eq!(msg, "too slow"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_operation_passes_through_its_error() {
        let out: Result<(), _> = with_deadline(Duration::from_secs(1), "x", async {
            Err(AppError::Protocol("NO [CANNOT]".to_owned()))
        })
        .await;
        assert!(matches!(out, Err(AppError::Protocol(_))));
    }

    #[test]
    fn fetch_message_advises_narrowing() {
        let msg = fetch_timeout_message(Duration::from_millis(90_000));
        assert!(msg.contains("90s"));
        assert!(msg.contains("smaller limit"));
    }
}
