//! Scoped registry cleanup.
//!
//! Transient test images must never outlive their build. [`with_cleanup`]
//! makes the deletion explicit: the delete is issued on every exit path of
//! the scope, exactly once.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use dlcforge_core::{ForgeError, ImageSpec, Result};

use crate::registry::ImageRegistry;

/// Run `body` and delete `image` from the registry afterwards, regardless of
/// outcome.
///
/// * The delete is best-effort: a cleanup failure is logged at `warn` and
///   never escalated, so it cannot mask the body's result.
/// * `deadline` bounds the body from inside the scope, so a host CI timeout
///   modeled as a deadline still reaches the finalizer before process exit.
pub async fn with_cleanup<T, F>(
    registry: &dyn ImageRegistry,
    image: &ImageSpec,
    deadline: Option<Duration>,
    body: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(result) => result,
            Err(_) => Err(ForgeError::Invocation(format!(
                "track exceeded deadline of {} seconds",
                limit.as_secs()
            ))),
        },
        None => body.await,
    };

    match registry.delete_image(image).await {
        Ok(()) => info!(image = %image.uri(), "cleaned up registry image"),
        Err(e) => {
            warn!(image = %image.uri(), error = %e, "registry cleanup failed; result unaffected");
        }
    }

    result
}
