use crate::telemetry::{OwnerInfo, SensorId, TelemetrySource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::warn;

type PendingLookup = Arc<OnceCell<Option<OwnerInfo>>>;

/// Coalesces owner lookups: concurrent callers for the same sensor share one
/// upstream request. The pending slot is dropped once it settles, so a later
/// call asks upstream again.
#[derive(Debug, Default)]
pub struct OwnerRegistry {
    pending: Mutex<HashMap<SensorId, PendingLookup>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup<S: TelemetrySource>(&self, source: &S, sensor_id: &str) -> Option<OwnerInfo> {
        let slot = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending
                .entry(sensor_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let owner = slot
            .get_or_init(|| async {
                match source.owner(sensor_id).await {
                    Ok(owner) => owner,
                    Err(err) => {
                        warn!(sensor_id, error = %err, "Owner lookup failed");
                        None
                    }
                }
            })
            .await
            .clone();

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending
            .get(sensor_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            pending.remove(sensor_id);
        }
        owner
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
