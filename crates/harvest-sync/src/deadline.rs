use std::{future::Future, time::Duration};
use tokio::time::timeout;

/// Runs `fut` under an optional deadline, turning expiry into the
/// collaborator's own timeout error.
pub(crate) async fn within<F, T, E>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}
