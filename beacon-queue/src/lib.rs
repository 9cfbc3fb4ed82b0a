#![deny(missing_docs)]
//! The background activity queue (§4.5): a bounded FIFO of pending
//! work drained by a fixed pool of persistent workers.
//!
//! Built around a fixed pool of persistent workers draining a bounded
//! channel, rather than spawning and joining one task per entry.
//! [`BackgroundQueue`] does not know how to run a turn itself — it
//! calls out to a [`TurnRunner`], which the facade crate implements
//! over `beacon-turn::Dispatcher`, keeping this crate's only
//! dependency `beacon-core`.

use async_trait::async_trait;
use beacon_core::{Activity, Adapter, BeaconError, InvokeResponse};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a worker calls to actually process a dequeued entry: construct
/// a turn context for the named agent type and run it to completion,
/// surfacing whatever `InvokeResponse` the turn produced (§4.2 step 9
/// runs inside this call).
#[async_trait]
pub trait TurnRunner: Send + Sync {
    /// Run one activity through the turn lifecycle for `agent_type`.
    async fn run(
        &self,
        agent_type: &str,
        activity: Activity,
        adapter: Arc<dyn Adapter>,
        cancel: CancellationToken,
    ) -> Result<Option<InvokeResponse>, BeaconError>;
}

/// One piece of queued work (§4.5): who asked for it, the adapter
/// that will carry its outbound activities, the activity itself, which
/// agent type should process it, and the callback that harvests the
/// eventual invoke response.
///
/// `on_complete` is guaranteed to run exactly once (Invariant P4):
/// [`Self::complete`] takes it on the success path, and [`Drop`] takes
/// it on any path that discards the entry without processing it
/// (queue-full, queue shutdown with entries still in flight).
pub struct QueueEntry {
    /// Identity of the caller that submitted this activity.
    pub caller: String,
    /// The adapter outbound activities from this turn should go through.
    pub adapter: Arc<dyn Adapter>,
    /// The activity to process.
    pub activity: Activity,
    /// Which concrete agent type should handle this activity.
    pub agent_type: String,
    on_complete: Option<Box<dyn FnOnce(Result<Option<InvokeResponse>, BeaconError>) + Send>>,
}

impl QueueEntry {
    /// Build a queue entry. `on_complete` runs exactly once, whatever
    /// happens to this entry afterward.
    pub fn new(
        caller: impl Into<String>,
        adapter: Arc<dyn Adapter>,
        activity: Activity,
        agent_type: impl Into<String>,
        on_complete: impl FnOnce(Result<Option<InvokeResponse>, BeaconError>) + Send + 'static,
    ) -> Self {
        Self {
            caller: caller.into(),
            adapter,
            activity,
            agent_type: agent_type.into(),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn complete(mut self, result: Result<Option<InvokeResponse>, BeaconError>) {
        if let Some(cb) = self.on_complete.take() {
            cb(result);
        }
    }
}

impl Drop for QueueEntry {
    fn drop(&mut self) {
        if let Some(cb) = self.on_complete.take() {
            cb(Err(BeaconError::SignInError {
                reason: "queue entry was discarded before it was processed".into(),
            }));
        }
    }
}

/// [`BackgroundQueue`] sizing (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of entries the queue holds before `enqueue` fails
    /// with [`BeaconError::QueueFull`].
    pub capacity: usize,
    /// Number of persistent worker tasks draining the queue.
    pub worker_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            worker_count: 4,
        }
    }
}

/// A bounded FIFO of pending activities (§4.5), drained by
/// [`QueueConfig::worker_count`] persistent workers calling into a
/// shared [`TurnRunner`].
pub struct BackgroundQueue {
    sender: mpsc::Sender<QueueEntry>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundQueue {
    /// Start the queue: spawn `config.worker_count` workers, each
    /// pulling from the same bounded channel and calling `runner.run`
    /// for every entry they dequeue.
    pub fn start(config: QueueConfig, runner: Arc<dyn TurnRunner>) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let mut workers = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count.max(1) {
            let receiver = receiver.clone();
            let runner = runner.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let entry = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match entry {
                        Some(entry) => Self::process(entry, &runner).await,
                        None => return,
                    }
                }
            }));
        }
        Self {
            sender,
            capacity: config.capacity,
            workers,
        }
    }

    async fn process(entry: QueueEntry, runner: &Arc<dyn TurnRunner>) {
        let cancel = CancellationToken::new();
        let result = runner
            .run(
                &entry.agent_type,
                entry.activity.clone(),
                entry.adapter.clone(),
                cancel,
            )
            .await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, caller = %entry.caller, "background turn failed");
        }
        entry.complete(result);
    }

    /// Enqueue one entry (§4.5). Never blocks: if the queue is at
    /// `capacity`, this fails immediately with
    /// [`BeaconError::QueueFull`] (and the entry's `on_complete` is
    /// invoked with the same error via [`Drop`]/[`QueueEntry::complete`]
    /// before this returns, satisfying Invariant P4 even on the
    /// rejected path).
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), BeaconError> {
        match self.sender.try_send(entry) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(entry)) => {
                entry.complete(Err(BeaconError::QueueFull {
                    capacity: self.capacity,
                }));
                Err(BeaconError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                entry.complete(Err(BeaconError::SignInError {
                    reason: "background queue is shut down".into(),
                }));
                Err(BeaconError::SignInError {
                    reason: "background queue is shut down".into(),
                })
            }
        }
    }

    /// Stop accepting new work, let workers drain whatever is already
    /// queued, then wait for every worker to exit.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{Activity, ResourceResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct NoopAdapter;
    #[async_trait]
    impl Adapter for NoopAdapter {
        async fn send_activities(
            &self,
            _ctx: &beacon_core::TurnContext,
            activities: Vec<Activity>,
        ) -> Result<Vec<ResourceResponse>, BeaconError> {
            Ok(vec![ResourceResponse::default(); activities.len()])
        }
    }

    struct CountingRunner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TurnRunner for CountingRunner {
        async fn run(
            &self,
            _agent_type: &str,
            _activity: Activity,
            _adapter: Arc<dyn Adapter>,
            _cancel: CancellationToken,
        ) -> Result<Option<InvokeResponse>, BeaconError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BeaconError::SignInError {
                    reason: "boom".into(),
                })
            } else {
                Ok(Some(InvokeResponse::ok(serde_json::json!({"ok": true}))))
            }
        }
    }

    #[tokio::test]
    async fn enqueued_entry_runs_and_completes_exactly_once() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let queue = BackgroundQueue::start(
            QueueConfig {
                capacity: 8,
                worker_count: 1,
            },
            runner.clone(),
        );

        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry::new(
            "caller-1",
            Arc::new(NoopAdapter),
            Activity::message("c1", "msteams"),
            "echo-agent",
            move |result| {
                let _ = tx.send(result);
            },
        );
        queue.enqueue(entry).unwrap();

        let result = rx.await.unwrap();
        assert!(result.unwrap().is_some());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        queue.shutdown().await;
    }

    // P4: a handler failure still invokes on_complete exactly once.
    #[tokio::test]
    async fn failing_turn_still_completes_exactly_once() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let queue = BackgroundQueue::start(
            QueueConfig {
                capacity: 8,
                worker_count: 1,
            },
            runner,
        );

        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry::new(
            "caller-1",
            Arc::new(NoopAdapter),
            Activity::message("c1", "msteams"),
            "echo-agent",
            move |result| {
                let _ = tx.send(result);
            },
        );
        queue.enqueue(entry).unwrap();

        let result = rx.await.unwrap();
        assert!(result.is_err());
        queue.shutdown().await;
    }

    // §4.5 backpressure: a full queue rejects with QueueFull and still
    // invokes on_complete exactly once for the rejected entry.
    #[tokio::test]
    async fn full_queue_rejects_and_completes_the_rejected_entry() {
        // No workers: nothing drains the channel, so the first entry
        // fills the capacity-1 queue and the second is rejected.
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let queue = BackgroundQueue::start(
            QueueConfig {
                capacity: 1,
                worker_count: 0,
            },
            runner,
        );

        let first = QueueEntry::new(
            "c1",
            Arc::new(NoopAdapter),
            Activity::message("c1", "msteams"),
            "agent",
            |_| {},
        );
        queue.enqueue(first).unwrap();

        let completed = Arc::new(Mutex::new(None));
        let completed2 = completed.clone();
        let second = QueueEntry::new(
            "c2",
            Arc::new(NoopAdapter),
            Activity::message("c2", "msteams"),
            "agent",
            move |result| {
                *completed2.lock().unwrap() = Some(result);
            },
        );
        let err = queue.enqueue(second).unwrap_err();
        assert!(matches!(err, BeaconError::QueueFull { .. }));
        assert!(completed.lock().unwrap().as_ref().unwrap().is_err());
    }

    // Invariant P4, the Drop path: an entry that's discarded without
    // ever being enqueued still completes exactly once.
    #[tokio::test]
    async fn dropping_an_unsent_entry_still_completes_it() {
        let completed = Arc::new(Mutex::new(false));
        let completed2 = completed.clone();
        let entry = QueueEntry::new(
            "c1",
            Arc::new(NoopAdapter),
            Activity::message("c1", "msteams"),
            "agent",
            move |_| {
                *completed2.lock().unwrap() = true;
            },
        );
        drop(entry);
        assert!(*completed.lock().unwrap());
    }

    #[tokio::test]
    async fn multiple_entries_drain_in_order_with_one_worker() {
        struct OrderRunner(Mutex<Vec<String>>);
        #[async_trait]
        impl TurnRunner for OrderRunner {
            async fn run(
                &self,
                _agent_type: &str,
                activity: Activity,
                _adapter: Arc<dyn Adapter>,
                _cancel: CancellationToken,
            ) -> Result<Option<InvokeResponse>, BeaconError> {
                self.0.lock().unwrap().push(activity.conversation.id.clone());
                Ok(None)
            }
        }

        let runner = Arc::new(OrderRunner(Mutex::new(Vec::new())));
        let queue = BackgroundQueue::start(
            QueueConfig {
                capacity: 8,
                worker_count: 1,
            },
            runner.clone(),
        );

        let mut receivers = Vec::new();
        for id in ["a", "b", "c"] {
            let (tx, rx) = oneshot::channel();
            let entry = QueueEntry::new(
                "caller",
                Arc::new(NoopAdapter),
                Activity::message(id, "msteams"),
                "agent",
                move |result| {
                    let _ = tx.send(result);
                },
            );
            queue.enqueue(entry).unwrap();
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert_eq!(*runner.0.lock().unwrap(), vec!["a", "b", "c"]);
        queue.shutdown().await;
    }
}
