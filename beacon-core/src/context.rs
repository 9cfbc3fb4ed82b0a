//! Per-turn context: the one object every selector, handler, and hook
//! sees, carrying the inbound activity, the outbound send path, the
//! reserved invoke-response slot, and the turn's cancel token.

use crate::activity::Activity;
use crate::adapter::{Adapter, ResourceResponse};
use crate::error::BeaconError;
use crate::invoke::InvokeResponse;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Everything a route selector, route handler, or hook needs about the
/// turn in progress.
///
/// `beacon-core` defines the shape; `beacon-turn`'s dispatcher
/// constructs one per turn and threads it through the route table,
/// hooks, and handler. Handlers never construct this directly.
pub struct TurnContext {
    /// The inbound activity this turn is processing.
    pub activity: Activity,
    adapter: Arc<dyn Adapter>,
    invoke_response: Mutex<Option<InvokeResponse>>,
    cancel: CancellationToken,
    sent: Notify,
}

impl TurnContext {
    /// Build a turn context around an inbound activity and the adapter
    /// that will carry outbound activities.
    pub fn new(activity: Activity, adapter: Arc<dyn Adapter>, cancel: CancellationToken) -> Self {
        Self {
            activity,
            adapter,
            invoke_response: Mutex::new(None),
            cancel,
            sent: Notify::new(),
        }
    }

    /// Send one outbound activity through the configured adapter.
    pub async fn send_activity(&self, activity: Activity) -> Result<ResourceResponse, BeaconError> {
        let mut responses = self.send_activities(vec![activity]).await?;
        Ok(responses.remove(0))
    }

    /// Send outbound activities through the configured adapter (§4.7).
    ///
    /// Wakes any task waiting on [`Self::sent_signal`] — `beacon-turn`'s
    /// typing timer (§4.2 step 2) uses this to stop itself as soon as a
    /// real outbound activity goes out, rather than running until the
    /// turn ends regardless.
    pub async fn send_activities(
        &self,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, BeaconError> {
        let result = Arc::clone(&self.adapter)
            .send_activities(self, activities)
            .await;
        self.sent.notify_waiters();
        result
    }

    /// A signal that fires once [`Self::send_activities`] has been
    /// called at least once during this turn. Waiters registered
    /// before the first send all wake; registering after a send that
    /// already happened waits for the *next* send instead (the usual
    /// `tokio::sync::Notify` semantics) — callers that need "has a
    /// send already happened" should check their own flag first.
    pub fn sent_signal(&self) -> &Notify {
        &self.sent
    }

    /// Record the response a handler wants returned for this turn's
    /// invoke activity. Last write wins (§4.7) — a handler that sets
    /// this twice only keeps the final value.
    pub fn set_invoke_response(&self, response: InvokeResponse) {
        *self.invoke_response.lock().unwrap() = Some(response);
    }

    /// Take whatever invoke response was set during this turn, if any.
    pub fn take_invoke_response(&self) -> Option<InvokeResponse> {
        self.invoke_response.lock().unwrap().take()
    }

    /// This turn's cancel token. Every suspending operation in the
    /// turn (storage, sign-in, handler bodies) should select against
    /// this per §5.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `true` if the turn has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
