use std::sync::Arc;
use std::time::Duration;

use exploitmap_output::mask;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::traits::ExploitService;

/// Upper bound on a console destroy call during release.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A console held for the duration of one attempt.
///
/// Call [`release`](Self::release) on every normal path. A lease dropped
/// without release (task aborted, panic) schedules a best-effort destroy on
/// the current runtime so the remote console is not leaked.
pub struct ConsoleLease {
    service: Arc<dyn ExploitService>,
    id: Option<String>,
}

impl ConsoleLease {
    pub async fn acquire(service: Arc<dyn ExploitService>) -> Result<Self, RpcError> {
        let id = service.console_create().await?;
        debug!(console = %id, "console acquired");
        Ok(Self {
            service,
            id: Some(id),
        })
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub async fn read(&self) -> Result<String, RpcError> {
        self.service.console_read(self.id()).await
    }

    /// Destroy the console. Failures are logged, never returned.
    pub async fn release(mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::time::timeout(RELEASE_TIMEOUT, self.service.console_destroy(&id)).await {
            Ok(Ok(())) => debug!(console = %id, "console released"),
            Ok(Err(e)) => {
                warn!(console = %id, error = %mask(&e.to_string()), "failed to destroy console")
            }
            Err(_) => warn!(console = %id, "timed out destroying console"),
        }
    }
}

impl Drop for ConsoleLease {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let service = self.service.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service.console_destroy(&id).await {
                        warn!(
                            console = %id,
                            error = %mask(&e.to_string()),
                            "failed to destroy abandoned console"
                        );
                    }
                });
            }
            Err(_) => warn!(console = %id, "console abandoned outside a runtime"),
        }
    }
}
