//! The typing-indicator timer (§4.2 step 2).
//!
//! While a message turn is in progress the dispatcher keeps the user
//! informed with a typing activity every second, until either a real
//! outbound activity goes out or the turn ends. The timer's own sends
//! go through a throwaway [`TurnContext`] built from the same adapter,
//! not the turn's shared context — routing them through the shared
//! context would fire [`TurnContext::sent_signal`] on every pulse and
//! the timer would stop itself after one tick.

use beacon_core::{Activity, ActivityType, Adapter, TurnContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TYPING_INTERVAL: Duration = Duration::from_secs(1);

/// A scoped typing-indicator timer. [`Self::stop`] cancels the
/// background task and waits for it to exit, so callers can rely on
/// "no more typing activities after `stop` returns" (Invariant P3).
pub struct TypingTimer {
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TypingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingTimer {
    /// An idle timer. Call [`Self::start`] to begin emitting pulses.
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start emitting typing activities every second, stopping on
    /// whichever of [`Self::stop`], `turn_cancel`, or the shared turn
    /// context's [`TurnContext::sent_signal`] fires first. A no-op if
    /// this timer is already running.
    pub fn start(&self, ctx: Arc<TurnContext>, adapter: Arc<dyn Adapter>, turn_cancel: CancellationToken) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let stop = self.stop.clone();
        let inbound = ctx.activity.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = turn_cancel.cancelled() => return,
                    _ = ctx.sent_signal().notified() => return,
                    _ = tokio::time::sleep(TYPING_INTERVAL) => {
                        let pulse = TurnContext::new(inbound.clone(), adapter.clone(), turn_cancel.clone());
                        let typing = inbound.reply(ActivityType::Typing);
                        if pulse.send_activity(typing).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        *handle = Some(join);
    }

    /// Stop the timer and wait for the background task to exit. A
    /// no-op if the timer was never started.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
