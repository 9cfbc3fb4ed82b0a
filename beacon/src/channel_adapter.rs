//! The §4.7 adapter contract: route outbound activities to either the
//! streaming multiplexer or a captured invoke response, by delivery
//! mode.

use async_trait::async_trait;
use beacon_core::{
    Activity, ActivityType, Adapter, BeaconError, DeliveryMode, InvokeResponse, ResourceResponse,
    TurnContext,
};
use beacon_stream::ResponseMultiplexer;
use std::sync::{Arc, Mutex};

/// Where `ChannelAdapter` leaves the turn's invoke response for a
/// request/response delivery mode turn. A plain `Mutex`-guarded slot
/// rather than `TurnContext`'s own reserved field, so the caller that
/// runs the turn (which may be a `beacon-queue` worker running well
/// after `run_turn` handed the `TurnContext` off) can read it back
/// without needing the `TurnContext` itself, which doesn't outlive the
/// call to `run_turn`.
#[derive(Default)]
pub struct InvokeResponseSlot(Mutex<Option<InvokeResponse>>);

impl InvokeResponseSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response. Last write wins (§4.7).
    pub fn set(&self, response: InvokeResponse) {
        *self.0.lock().unwrap() = Some(response);
    }

    /// Take whatever response was recorded, if any.
    pub fn take(&self) -> Option<InvokeResponse> {
        self.0.lock().unwrap().take()
    }
}

/// Routes outbound activities by `turn_context.activity.delivery_mode`
/// (§4.7): a streaming turn forwards to the multiplexer keyed by
/// `request_id`; a request/response turn captures any
/// `activity-type: invoke-response` activity into an
/// [`InvokeResponseSlot`] instead of forwarding it, and passes
/// everything else through to `inner` (the real channel transport,
/// out of scope for this crate — see [`crate::CollectingAdapter`] for a
/// test/prototyping stand-in).
pub struct ChannelAdapter {
    inner: Arc<dyn Adapter>,
    multiplexer: Arc<ResponseMultiplexer>,
    invoke_slot: Arc<InvokeResponseSlot>,
}

impl ChannelAdapter {
    /// Build a channel adapter. `invoke_slot` is typically fresh per
    /// turn — share one across turns and a later turn's response can
    /// overwrite an earlier one a caller hasn't read yet.
    pub fn new(
        inner: Arc<dyn Adapter>,
        multiplexer: Arc<ResponseMultiplexer>,
        invoke_slot: Arc<InvokeResponseSlot>,
    ) -> Self {
        Self {
            inner,
            multiplexer,
            invoke_slot,
        }
    }

    fn invoke_response_from(activity: &Activity) -> InvokeResponse {
        let status = activity
            .value
            .get("status")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(200) as u16;
        let body = activity
            .value
            .get("body")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        InvokeResponse { status, body }
    }
}

#[async_trait]
impl Adapter for ChannelAdapter {
    #[tracing::instrument(skip_all, fields(delivery_mode = ?ctx.activity.delivery_mode, count = activities.len()))]
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, BeaconError> {
        match ctx.activity.delivery_mode {
            DeliveryMode::Stream => {
                let request_id =
                    ctx.activity
                        .request_id
                        .clone()
                        .ok_or_else(|| BeaconError::InvalidActivity {
                            reason: "stream delivery_mode requires activity.request_id".into(),
                        })?;
                let n = activities.len();
                self.multiplexer.send(&request_id, activities).await?;
                Ok(vec![ResourceResponse::default(); n])
            }
            DeliveryMode::Normal | DeliveryMode::ExpectReplies => {
                let mut to_forward = Vec::with_capacity(activities.len());
                let mut responses = Vec::with_capacity(activities.len());
                for activity in activities {
                    if activity.activity_type == ActivityType::InvokeResponse {
                        self.invoke_slot.set(Self::invoke_response_from(&activity));
                        responses.push(ResourceResponse::default());
                    } else {
                        to_forward.push(activity);
                    }
                }
                if !to_forward.is_empty() {
                    responses.extend(self.inner.send_activities(ctx, to_forward).await?);
                }
                Ok(responses)
            }
            _ => self.inner.send_activities(ctx, activities).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollectingAdapter;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn stream_mode_forwards_to_multiplexer_not_inner() {
        let inner = Arc::new(CollectingAdapter::new());
        let mux = Arc::new(ResponseMultiplexer::new());
        mux.start("req-1").await;
        let slot = Arc::new(InvokeResponseSlot::new());
        let adapter = ChannelAdapter::new(inner.clone(), mux.clone(), slot);

        let mut activity = Activity::message("c1", "msteams");
        activity.delivery_mode = DeliveryMode::Stream;
        activity.request_id = Some("req-1".into());
        let ctx = TurnContext::new(activity, Arc::new(CollectingAdapter::new()), CancellationToken::new());

        adapter
            .send_activities(&ctx, vec![Activity::message("c1", "msteams").with_text("hi")])
            .await
            .unwrap();

        assert!(inner.take().is_empty());
        mux.complete("req-1").await.unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        mux.consume(
            "req-1",
            move |a| {
                let received = received2.clone();
                async move {
                    received.lock().unwrap().push(a.text.clone());
                    Ok(())
                }
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(*received.lock().unwrap(), vec![Some("hi".to_string())]);
    }

    #[tokio::test]
    async fn normal_mode_captures_invoke_response_and_forwards_the_rest() {
        let inner = Arc::new(CollectingAdapter::new());
        let mux = Arc::new(ResponseMultiplexer::new());
        let slot = Arc::new(InvokeResponseSlot::new());
        let adapter = ChannelAdapter::new(inner.clone(), mux, slot.clone());

        let activity = Activity::message("c1", "msteams");
        let ctx = TurnContext::new(activity, Arc::new(CollectingAdapter::new()), CancellationToken::new());

        let mut invoke_response = Activity::message("c1", "msteams");
        invoke_response.activity_type = ActivityType::InvokeResponse;
        invoke_response.value = serde_json::json!({"status": 201, "body": {"ok": true}});

        adapter
            .send_activities(
                &ctx,
                vec![
                    Activity::message("c1", "msteams").with_text("reply"),
                    invoke_response,
                ],
            )
            .await
            .unwrap();

        let forwarded = inner.take();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].text.as_deref(), Some("reply"));
        let response = slot.take().unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body["ok"], true);
    }
}
