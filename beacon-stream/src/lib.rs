#![deny(missing_docs)]
//! The streaming response multiplexer (§4.6): a registry of per-request
//! channels that lets a handler (possibly running on a background
//! worker, see `beacon-queue`) emit activities while an HTTP responder
//! consumes them as they arrive.
//!
//! The channel-per-request-id registry and SSE frame format follow the
//! `tokio::sync::mpsc` + `event: message\ndata: ...\n\n` framing idiom
//! common to streaming response handlers, adapted so this crate owns
//! the channel registry directly rather than wrapping it in an axum
//! `Stream`/`IntoResponse` impl — HTTP hosting is out of scope.

use beacon_core::{Activity, BeaconError};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

enum StreamItem {
    Activity(Activity),
    Abort(String),
}

struct Channels {
    senders: HashMap<String, mpsc::UnboundedSender<StreamItem>>,
    receivers: HashMap<String, mpsc::UnboundedReceiver<StreamItem>>,
}

/// Registry of per-`request_id` streaming channels (§4.6, Component H).
///
/// `start` registers a channel; `send` and `abort` are called by
/// whatever produces activities for that request (a route handler
/// running inline, or one running on a `beacon-queue` worker); `consume`
/// is called once, by the HTTP responder, to drain the channel in
/// order; `complete` closes it. Concurrent streams for different
/// `request_id`s never interfere — each has its own unbounded channel,
/// so `send` never blocks on a slow or absent consumer.
pub struct ResponseMultiplexer {
    channels: Mutex<Channels>,
}

impl ResponseMultiplexer {
    /// Build an empty multiplexer.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Channels {
                senders: HashMap::new(),
                receivers: HashMap::new(),
            }),
        }
    }

    /// Register a new channel for `request_id`. Calling this twice for
    /// the same id replaces the previous channel (and drops its
    /// receiver, if `consume` hasn't taken it yet).
    pub async fn start(&self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().await;
        channels.senders.insert(request_id.clone(), tx);
        channels.receivers.insert(request_id, rx);
    }

    /// Emit activities for `request_id`, in order. Sending never
    /// blocks — the underlying channel is unbounded, since a slow HTTP
    /// consumer must never stall whatever worker produced the turn's
    /// output.
    pub async fn send(
        &self,
        request_id: &str,
        activities: Vec<Activity>,
    ) -> Result<(), BeaconError> {
        let channels = self.channels.lock().await;
        let tx = channels
            .senders
            .get(request_id)
            .ok_or_else(|| BeaconError::UnknownStream {
                request_id: request_id.to_owned(),
            })?;
        for activity in activities {
            // A closed receiver (consumer gone) is not this call's
            // problem to report — at-most-once delivery still held,
            // there's simply no one left to deliver to.
            let _ = tx.send(StreamItem::Activity(activity));
        }
        Ok(())
    }

    /// Close the channel for `request_id` without an error. Activities
    /// already sent are still delivered; `consume` returns `Ok(())`
    /// once it has drained them.
    pub async fn complete(&self, request_id: &str) -> Result<(), BeaconError> {
        let mut channels = self.channels.lock().await;
        channels
            .senders
            .remove(request_id)
            .map(|_| ())
            .ok_or_else(|| BeaconError::UnknownStream {
                request_id: request_id.to_owned(),
            })
    }

    /// Abort the stream for `request_id` with `reason` (§9 Decisions:
    /// streaming-error-after-flush is opt-in, not automatic). Activities
    /// already sent are still delivered to `consume` first; the abort
    /// is the last thing the consumer sees, surfaced as
    /// `Err(BeaconError::StreamAborted)`.
    pub async fn abort(&self, request_id: &str, reason: impl Into<String>) -> Result<(), BeaconError> {
        let reason = reason.into();
        tracing::warn!(request_id, reason = %reason, "aborting stream");
        let mut channels = self.channels.lock().await;
        let tx = channels
            .senders
            .remove(request_id)
            .ok_or_else(|| BeaconError::UnknownStream {
                request_id: request_id.to_owned(),
            })?;
        let _ = tx.send(StreamItem::Abort(reason));
        Ok(())
    }

    /// Drain the channel registered by `start(request_id)`, calling
    /// `sink` for each activity in send order, until `complete` closes
    /// the channel, `abort` fires, or `cancel` is triggered.
    ///
    /// May only be called once per `request_id` — it takes ownership of
    /// the receiver half. A second call (or one with no matching
    /// `start`) returns `Err(BeaconError::UnknownStream)`.
    #[tracing::instrument(skip(self, sink, cancel))]
    pub async fn consume<S, Fut>(
        &self,
        request_id: &str,
        mut sink: S,
        cancel: CancellationToken,
    ) -> Result<(), BeaconError>
    where
        S: FnMut(Activity) -> Fut,
        Fut: Future<Output = Result<(), BeaconError>>,
    {
        let mut rx = {
            let mut channels = self.channels.lock().await;
            channels
                .receivers
                .remove(request_id)
                .ok_or_else(|| BeaconError::UnknownStream {
                    request_id: request_id.to_owned(),
                })?
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("stream consumer cancelled");
                    return Err(BeaconError::StreamAborted {
                        reason: "consumer cancelled".into(),
                    });
                }
                item = rx.recv() => {
                    match item {
                        Some(StreamItem::Activity(activity)) => sink(activity).await?,
                        Some(StreamItem::Abort(reason)) => {
                            tracing::debug!(reason = %reason, "stream aborted while consuming");
                            return Err(BeaconError::StreamAborted { reason });
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

impl Default for ResponseMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one activity as an SSE frame: `event: message\ndata:
/// <json>\n\n`. A pure function so an HTTP hosting layer can use the
/// same framing this crate's tests assert on without beacon owning the
/// transport (§4.6).
pub fn sse_frame(activity: &Activity) -> Result<String, BeaconError> {
    let json = serde_json::to_string(activity).map_err(|e| BeaconError::Other(Box::new(e)))?;
    Ok(format!("event: message\ndata: {json}\n\n"))
}
