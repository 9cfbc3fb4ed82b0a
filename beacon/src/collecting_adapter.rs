//! A trivial [`Adapter`] that records every activity it's given instead
//! of delivering it anywhere — real channel delivery is a hosting-layer
//! concern (§6, out of scope). Useful as the `inner` transport behind
//! [`crate::ChannelAdapter`] in tests and examples, and as the
//! `ExpectReplies` collection point: a host wires one in, runs a turn,
//! then drains it to build the response body.

use async_trait::async_trait;
use beacon_core::{Activity, BeaconError, ResourceResponse, TurnContext};
use std::sync::Mutex;

/// Records every activity sent through it, in order.
#[derive(Default)]
pub struct CollectingAdapter {
    sent: Mutex<Vec<Activity>>,
}

impl CollectingAdapter {
    /// An adapter with nothing recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return everything recorded so far, in send order.
    pub fn take(&self) -> Vec<Activity> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

#[async_trait]
impl beacon_core::Adapter for CollectingAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, BeaconError> {
        let n = activities.len();
        self.sent.lock().unwrap().extend(activities);
        Ok(vec![ResourceResponse::default(); n])
    }
}
