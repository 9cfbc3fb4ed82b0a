//! Bridges `beacon-queue`'s transport-agnostic [`TurnRunner`] to a
//! concrete [`Dispatcher`] per agent type, so a [`BackgroundQueue`] can
//! drive turns without depending on `beacon-turn` directly.
//!
//! [`BackgroundQueue`]: beacon_queue::BackgroundQueue

use crate::channel_adapter::{ChannelAdapter, InvokeResponseSlot};
use async_trait::async_trait;
use beacon_core::{Activity, Adapter, BeaconError, InvokeResponse};
use beacon_queue::TurnRunner;
use beacon_stream::ResponseMultiplexer;
use beacon_turn::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A [`TurnRunner`] that looks up a [`Dispatcher`] by agent type and
/// runs the turn through it, wrapping whatever `Adapter` the caller
/// supplied in a [`ChannelAdapter`] so the dispatch correctly routes
/// streaming vs. request/response delivery (§4.7), and surfaces the
/// resulting invoke response (if any) back to the queue's caller.
pub struct DispatcherTurnRunner {
    dispatchers: HashMap<String, Arc<Dispatcher>>,
    multiplexer: Arc<ResponseMultiplexer>,
}

impl DispatcherTurnRunner {
    /// Build a runner over one dispatcher per agent type, all sharing
    /// one multiplexer (so `request_id`s across agent types share the
    /// same streaming registry).
    pub fn new(
        dispatchers: HashMap<String, Arc<Dispatcher>>,
        multiplexer: Arc<ResponseMultiplexer>,
    ) -> Self {
        Self {
            dispatchers,
            multiplexer,
        }
    }
}

#[async_trait]
impl TurnRunner for DispatcherTurnRunner {
    #[tracing::instrument(skip_all, fields(agent_type, conversation_id = %activity.conversation.id))]
    async fn run(
        &self,
        agent_type: &str,
        activity: Activity,
        adapter: Arc<dyn Adapter>,
        cancel: CancellationToken,
    ) -> Result<Option<InvokeResponse>, BeaconError> {
        let dispatcher = self.dispatchers.get(agent_type).cloned().ok_or_else(|| {
            tracing::warn!(agent_type, "no dispatcher registered for agent type");
            BeaconError::InvalidActivity {
                reason: format!("no dispatcher registered for agent type \"{agent_type}\""),
            }
        })?;

        let slot = Arc::new(InvokeResponseSlot::new());
        let channel_adapter = Arc::new(ChannelAdapter::new(
            adapter,
            self.multiplexer.clone(),
            slot.clone(),
        ));

        dispatcher.run_turn(activity, channel_adapter, cancel).await?;
        Ok(slot.take())
    }
}
