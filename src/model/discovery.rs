use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::BridgeError;
use crate::model::runtime::ModelRuntime;
use crate::schedule::Sleeper;

/// Seconds of probing after which discovery gives up. The probe runs once
/// more at the limit, so it is checked `MODULE_SEARCH_LIMIT + 2` times.
pub const MODULE_SEARCH_LIMIT: u32 = 5;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub type RuntimeProbe = Arc<dyn Fn() -> Option<Arc<dyn ModelRuntime>> + Send + Sync>;

/// Where the inference capability comes from.
pub enum CapabilitySource {
    Ready(Arc<dyn ModelRuntime>),
    /// Resolves to the capability, or `None` if it will never be available.
    Pending {
        future: BoxFuture<'static, Option<Arc<dyn ModelRuntime>>>,
        timeout: Duration,
    },
    /// Checked once per [`PROBE_INTERVAL`] until it has been probed past
    /// [`MODULE_SEARCH_LIMIT`] seconds.
    Probe(RuntimeProbe),
}

impl CapabilitySource {
    pub async fn resolve(self, sleeper: &dyn Sleeper) -> Result<Arc<dyn ModelRuntime>, BridgeError> {
        match self {
            Self::Ready(runtime) => Ok(runtime),
            Self::Pending { future, timeout } => match tokio::time::timeout(timeout, future).await {
                Ok(Some(runtime)) => Ok(runtime),
                Ok(None) => Err(BridgeError::ModuleNotFound),
                Err(_) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "runtime capability timed out");
                    Err(BridgeError::ModuleNotFound)
                }
            },
            Self::Probe(probe) => {
                for attempt in 0..=MODULE_SEARCH_LIMIT + 1 {
                    if attempt > 0 {
                        sleeper.sleep(PROBE_INTERVAL).await;
                    }
                    if let Some(runtime) = probe() {
                        tracing::debug!(attempt, "runtime capability found");
                        return Ok(runtime);
                    }
                }
                Err(BridgeError::ModuleNotFound)
            }
        }
    }
}

impl std::fmt::Debug for CapabilitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("CapabilitySource::Ready"),
            Self::Pending { timeout, .. } => f
                .debug_struct("CapabilitySource::Pending")
                .field("timeout", timeout)
                .finish(),
            Self::Probe(_) => f.write_str("CapabilitySource::Probe"),
        }
    }
}
