//! The per-(channel, conversation, auth name) sign-in flow record (§3.5).

use beacon_core::{BeaconError, Storage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The scope every flow-state key lives under, regardless of whether
/// it's a standard OAuth key or an SSO per-exchange key.
pub const FLOW_SCOPE: &str = "auth-flow";

/// Persistent record of where a user is in a sign-in sequence (§3.5).
///
/// `flow_expires` is stored as milliseconds since the Unix epoch —
/// `SystemTime` isn't directly `Serialize`, and a plain integer is
/// what actually crosses the storage boundary as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Whether a sign-in is currently in progress.
    pub flow_started: bool,
    /// When the in-progress flow expires, in millis since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_expires_ms: Option<u64>,
    /// How many invalid continue attempts have been made since the
    /// flow started (or was last reset).
    #[serde(default)]
    pub continue_count: u32,
}

impl FlowState {
    /// Mark a flow as started, expiring after `timeout` from now.
    pub fn start(&mut self, timeout: Duration) {
        self.flow_started = true;
        self.flow_expires_ms = Some(epoch_millis(SystemTime::now() + timeout));
        self.continue_count = 0;
    }

    /// `true` once `flow_expires_ms` has passed relative to `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.flow_expires_ms {
            Some(ms) => epoch_millis(now) > ms,
            None => false,
        }
    }
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Read a flow-state record, or a fresh default if the key is absent.
/// Returns the state plus the etag it was read with (`None` if the key
/// didn't exist, so the next write can use the "create, don't
/// overwrite" mode).
pub async fn read_flow_state(
    storage: &dyn Storage,
    key: &str,
) -> Result<(FlowState, Option<String>), BeaconError> {
    match storage.read(FLOW_SCOPE, key).await? {
        Some(record) => {
            let state: FlowState = serde_json::from_value(record.value).map_err(|e| {
                BeaconError::Other(Box::new(e))
            })?;
            Ok((state, Some(record.etag)))
        }
        None => Ok((FlowState::default(), None)),
    }
}

/// Write a flow-state record back, returning its new etag.
pub async fn write_flow_state(
    storage: &dyn Storage,
    key: &str,
    state: &FlowState,
    expected_etag: Option<&str>,
) -> Result<String, BeaconError> {
    let value = serde_json::to_value(state).expect("FlowState always serializes");
    let record = storage.write(FLOW_SCOPE, key, value, expected_etag).await?;
    Ok(record.etag)
}

/// Delete a flow-state record. Deleting a missing key is not an error
/// (§8.2 — `reset_state` is idempotent).
pub async fn clear_flow_state(storage: &dyn Storage, key: &str) -> Result<(), BeaconError> {
    storage.delete(FLOW_SCOPE, key).await
}
