//! The contract by which handlers send outbound activities (§4.7).

use crate::activity::Activity;
use crate::context::TurnContext;
use crate::error::BeaconError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the channel acknowledged for one sent activity, e.g. the id it
/// assigned. Opaque beyond that — channels differ in what they return.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    /// The id the channel assigned to the sent activity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Sends outbound activities produced during a turn.
///
/// For a streaming turn (`delivery_mode == Stream`) a concrete
/// implementation forwards to the streaming multiplexer keyed by
/// `turn_context.activity.request_id` (§4.6); for request/response
/// turns it records the last [`crate::InvokeResponse`] written to the
/// turn context's reserved slot. `beacon-core` only defines the
/// contract — the routing-by-delivery-mode implementation lives in the
/// facade crate, which is where both the multiplexer and the invoke
/// slot are in scope.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Send one or more activities produced during this turn.
    async fn send_activities(
        &self,
        turn_context: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, BeaconError>;
}
