//! Conflict-retrying status writer.
//!
//! Reconcilers compute the desired status through a mutate closure over a
//! freshly read object; when the closure reports no change, no write is
//! issued. Optimistic-concurrency conflicts re-read and retry with
//! exponential backoff.

use std::time::Duration;

use keel_core::{ClusterClient, KeelError, KeelResult, Resource};

const MAX_ATTEMPTS: u32 = 5;

/// Read-modify-write the status sub-resource.
///
/// Returns the updated object, or None when it no longer exists. The
/// closure returns whether it changed anything; unchanged objects produce
/// zero writes.
pub async fn update_status_with_retry<R, F>(
    cluster: &ClusterClient,
    namespace: &str,
    name: &str,
    mutate: F,
) -> KeelResult<Option<R>>
where
    R: Resource,
    F: Fn(&mut R) -> bool,
{
    let mut delay = Duration::from_millis(50);

    for attempt in 1..=MAX_ATTEMPTS {
        let Some(mut object) = cluster.get::<R>(namespace, name).await? else {
            return Ok(None);
        };
        if !mutate(&mut object) {
            return Ok(Some(object));
        }

        match cluster.update_status(&object).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                tracing::debug!(
                    kind = R::KIND,
                    object = %format!("{}/{}", namespace, name),
                    attempt,
                    "status write conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(KeelError::conflict(format!(
        "{} {}/{} status write failed after {} attempts",
        R::KIND,
        namespace,
        name,
        MAX_ATTEMPTS
    )))
}
