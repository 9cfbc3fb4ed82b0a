//! The per-turn dispatcher: the full §4.2 turn lifecycle, start to finish.

use crate::config::DispatcherConfig;
use crate::mention;
use crate::typing::TypingTimer;
use beacon_auth::{AuthFlow, FlowOutcome};
use beacon_core::{
    Activity, Adapter, BeaconError, JsonTurnState, Storage, TurnContext, TurnState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STATE_SCOPE: &str = "turn-state";
const AUTH_PENDING_KEY: &str = "auth.pending";

/// How a turn concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A route handled the activity and the resulting state was saved.
    Dispatched {
        /// Whether a route actually matched (vs. falling through with
        /// no match, which is not an error — §8.3's empty-route-table
        /// boundary).
        matched: bool,
    },
    /// A before-turn hook vetoed the turn before routing ran.
    SkippedByHook,
    /// An after-turn hook vetoed the state save.
    StateSaveSkipped,
    /// The sign-in detour started or resumed a flow and is waiting on
    /// the user; the turn ends here without dispatching a route.
    SignInPending,
    /// The turn was cancelled (§5) before it reached the save step; no
    /// state was written.
    Cancelled,
}

fn state_key(activity: &Activity) -> String {
    format!("{}/{}", activity.channel_id.as_str(), activity.conversation.id)
}

async fn load_state(
    storage: &dyn Storage,
    key: &str,
) -> Result<(JsonTurnState, Option<String>), BeaconError> {
    match storage.read(STATE_SCOPE, key).await? {
        Some(record) => {
            let map = record.value.as_object().cloned().unwrap_or_default();
            Ok((JsonTurnState::from_map(map), Some(record.etag)))
        }
        None => Ok((JsonTurnState::new(), None)),
    }
}

async fn save_state(
    storage: &dyn Storage,
    key: &str,
    state: JsonTurnState,
    expected_etag: Option<&str>,
) -> Result<(), BeaconError> {
    let value = serde_json::Value::Object(state.into_map());
    storage.write(STATE_SCOPE, key, value, expected_etag).await?;
    Ok(())
}

/// Runs one activity through validation, the typing timer, mention
/// stripping, the sign-in detour, and the route table, exactly once
/// per call (§4.2). One `Dispatcher` is shared across turns; all
/// per-turn state lives in the [`TurnContext`] and [`JsonTurnState`]
/// `run_turn` builds for that call.
pub struct Dispatcher {
    routes: beacon_routing::RouteTable,
    storage: Arc<dyn Storage>,
    auth: Option<Arc<dyn AuthFlow>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Build a dispatcher around a route table and a state-storage
    /// backend. Call [`Self::with_auth`] to wire in a sign-in flow.
    pub fn new(routes: beacon_routing::RouteTable, storage: Arc<dyn Storage>, config: DispatcherConfig) -> Self {
        Self {
            routes,
            storage,
            auth: None,
            config,
        }
    }

    /// Attach the sign-in flow machine the sign-in detour (§4.4) calls
    /// into.
    pub fn with_auth(mut self, auth: Arc<dyn AuthFlow>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Run one turn to completion (§4.2 steps 1–11).
    #[tracing::instrument(skip_all, fields(conversation_id = %activity.conversation.id))]
    pub async fn run_turn(
        &self,
        mut activity: Activity,
        adapter: Arc<dyn Adapter>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, BeaconError> {
        // Step 1: validate.
        activity.validate()?;

        // Step 3: mention stripping, before the context is built — the
        // dispatcher owns `activity` outright at this point.
        if self.config.remove_recipient_mention && activity.is_message() {
            if let Some(text) = activity.text.take() {
                let recipient_name = activity.recipient.as_ref().and_then(|r| r.name.as_deref());
                activity.text = Some(mention::strip_recipient_mention(&text, recipient_name));
            }
        }

        let is_message = activity.is_message();
        let ctx = Arc::new(TurnContext::new(activity, adapter.clone(), cancel.clone()));

        // Step 2: start the typing timer. It runs concurrently with
        // everything below and is always stopped before this function
        // returns, regardless of how the turn concludes.
        let typing = TypingTimer::new();
        if self.config.start_typing_timer && is_message {
            typing.start(ctx.clone(), adapter, cancel.clone());
        }

        let outcome = self.run_turn_inner(&ctx, &cancel).await;

        // Step 11: stop the typing timer in every exit path (P3).
        typing.stop().await;

        outcome
    }

    async fn run_turn_inner(
        &self,
        ctx: &Arc<TurnContext>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, BeaconError> {
        // Step 4: load state. The etag read here is reused on every save
        // below: this turn's write only succeeds if nothing else wrote
        // to this conversation's state between this read and that save
        // (optimistic concurrency, §6.3) — a conflicting concurrent turn
        // on the same conversation surfaces as `BeaconError::EtagMismatch`
        // rather than silently overwriting (§5, §9).
        let key = state_key(&ctx.activity);
        let (mut state, etag) = load_state(&*self.storage, &key).await?;

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // Step 5: sign-in detour.
        if let Some(outcome) = self
            .run_sign_in_detour(ctx, &mut state, &key, etag.as_deref())
            .await?
        {
            return Ok(outcome);
        }

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // Step 6: populate temp.input from the (possibly mention-stripped)
        // activity text, unless a handler already set it on a previous
        // pass through this state.
        if state.temp_input().is_none() {
            if let Some(text) = &ctx.activity.text {
                state.set_temp_input(text.clone());
            }
        }

        // Step 7: before-turn hooks.
        if !self.routes.run_before_hooks(ctx, &mut state).await? {
            save_state(&*self.storage, &key, state, etag.as_deref()).await?;
            return Ok(TurnOutcome::SkippedByHook);
        }

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // Step 8: route dispatch.
        let matched = self.routes.dispatch(ctx, &mut state).await?;

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // Step 9: after-turn hooks.
        if !self.routes.run_after_hooks(ctx, &mut state).await? {
            return Ok(TurnOutcome::StateSaveSkipped);
        }

        // Step 10: save state.
        save_state(&*self.storage, &key, state, etag.as_deref()).await?;

        Ok(TurnOutcome::Dispatched { matched })
    }

    /// Runs the sign-in detour when either a flow is already pending
    /// for this conversation or the configured `auto_sign_in` selector
    /// matches. Returns `Some(outcome)` when the detour itself decides
    /// the turn's outcome (pending or a fatal error); `None` means the
    /// turn should fall through to ordinary routing.
    async fn run_sign_in_detour(
        &self,
        ctx: &Arc<TurnContext>,
        state: &mut JsonTurnState,
        key: &str,
        etag: Option<&str>,
    ) -> Result<Option<TurnOutcome>, BeaconError> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };

        let already_pending = state
            .get(AUTH_PENDING_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let should_run = if already_pending {
            true
        } else if let Some(selector) = &self.config.auto_sign_in {
            selector.matches(ctx).await
        } else {
            false
        };

        if !should_run || !auth.is_valid_activity(&ctx.activity) {
            return Ok(None);
        }

        match auth.sign_in(ctx, false, None, None).await {
            FlowOutcome::Pending => {
                state.set(AUTH_PENDING_KEY, serde_json::Value::Bool(true));
                save_state(&*self.storage, key, state.clone(), etag).await?;
                Ok(Some(TurnOutcome::SignInPending))
            }
            FlowOutcome::Complete(_token) => {
                state.remove(AUTH_PENDING_KEY);
                Ok(None)
            }
            // §4.2 step 5: an invalid-activity failure is not this
            // turn's concern — fall through to ordinary routing so a
            // handler can decide what to do with it.
            FlowOutcome::Error(BeaconError::InvalidActivity { .. }) => Ok(None),
            FlowOutcome::Error(e) => {
                state.remove(AUTH_PENDING_KEY);
                let _ = save_state(&*self.storage, key, state.clone(), etag).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::{ActivityType, ChannelId, ResourceResponse, StorageRecord};
    use beacon_routing::{selector_fn, ActivityMatcher, RouteHandler, RouteTable};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct InMemoryStorage {
        records: Mutex<HashMap<(String, String), StorageRecord>>,
        counter: AtomicU64,
    }

    impl InMemoryStorage {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                counter: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Storage for InMemoryStorage {
        async fn read(&self, scope: &str, key: &str) -> Result<Option<StorageRecord>, BeaconError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(scope.to_owned(), key.to_owned()))
                .cloned())
        }

        async fn write(
            &self,
            scope: &str,
            key: &str,
            value: serde_json::Value,
            expected_etag: Option<&str>,
        ) -> Result<StorageRecord, BeaconError> {
            let mut records = self.records.lock().unwrap();
            let map_key = (scope.to_owned(), key.to_owned());
            let current = records.get(&map_key);
            let collides = match (expected_etag, current) {
                (None, Some(_)) => true,
                (Some(expected), Some(record)) => record.etag != expected,
                (Some(_), None) => true,
                _ => false,
            };
            if collides {
                return Err(BeaconError::EtagMismatch {
                    scope: scope.to_owned(),
                    key: key.to_owned(),
                });
            }
            let record = StorageRecord {
                value,
                etag: self.counter.fetch_add(1, Ordering::SeqCst).to_string(),
            };
            records.insert(map_key, record.clone());
            Ok(record)
        }

        async fn delete(&self, scope: &str, key: &str) -> Result<(), BeaconError> {
            self.records
                .lock()
                .unwrap()
                .remove(&(scope.to_owned(), key.to_owned()));
            Ok(())
        }

        async fn list(&self, scope: &str) -> Result<Vec<String>, BeaconError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .keys()
                .filter(|(s, _)| s == scope)
                .map(|(_, k)| k.clone())
                .collect())
        }
    }

    struct NoopAdapter;
    #[async_trait]
    impl Adapter for NoopAdapter {
        async fn send_activities(
            &self,
            _ctx: &TurnContext,
            activities: Vec<Activity>,
        ) -> Result<Vec<ResourceResponse>, BeaconError> {
            Ok(vec![ResourceResponse::default(); activities.len()])
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);
    #[async_trait]
    impl RouteHandler for CountingHandler {
        async fn handle(
            &self,
            _ctx: &TurnContext,
            state: &mut dyn TurnState,
        ) -> Result<(), BeaconError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            state.set("handled", serde_json::Value::Bool(true));
            Ok(())
        }
    }

    // §8.3 boundary: an empty route table still completes the turn
    // (no match is not an error).
    #[tokio::test]
    async fn empty_route_table_completes_without_a_match() {
        let dispatcher = Dispatcher::new(
            RouteTable::new(),
            Arc::new(InMemoryStorage::new()),
            DispatcherConfig::new(),
        );
        let outcome = dispatcher
            .run_turn(
                Activity::message("c1", "msteams").with_text("hi"),
                Arc::new(NoopAdapter),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Dispatched { matched: false });
    }

    #[tokio::test]
    async fn matched_route_runs_and_state_is_saved() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = RouteTable::new();
        table.add_activity(
            [ActivityMatcher::Type(ActivityType::Message)],
            Arc::new(CountingHandler(hits.clone())),
            false,
        );
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(table, storage.clone(), DispatcherConfig::new());

        let outcome = dispatcher
            .run_turn(
                Activity::message("c1", "msteams").with_text("hi"),
                Arc::new(NoopAdapter),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Dispatched { matched: true });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let record = storage
            .read("turn-state", &format!("{}/{}", "msteams", "c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value["handled"], true);
    }

    // A second turn on the same conversation must still be able to save
    // state — the etag read at the start of each turn is what's offered
    // back on save, not a blanket create-only write.
    #[tokio::test]
    async fn a_second_turn_on_the_same_conversation_can_still_save_state() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = RouteTable::new();
        table.add_activity(
            [ActivityMatcher::Type(ActivityType::Message)],
            Arc::new(CountingHandler(hits.clone())),
            false,
        );
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(table, storage.clone(), DispatcherConfig::new());

        for _ in 0..2 {
            let outcome = dispatcher
                .run_turn(
                    Activity::message("c1", "msteams").with_text("hi"),
                    Arc::new(NoopAdapter),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Dispatched { matched: true });
        }

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    // P3: the typing timer is stopped even when a route veto skips the
    // save step.
    #[tokio::test]
    async fn before_hook_veto_skips_routing_but_still_saves_state() {
        struct VetoHook;
        #[async_trait]
        impl beacon_routing::TurnHook for VetoHook {
            async fn run(
                &self,
                _ctx: &TurnContext,
                _state: &mut dyn TurnState,
            ) -> Result<bool, BeaconError> {
                Ok(false)
            }
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = RouteTable::new();
        table.before_turn(Arc::new(VetoHook));
        table.add_activity(
            [ActivityMatcher::Type(ActivityType::Message)],
            Arc::new(CountingHandler(hits.clone())),
            false,
        );
        let dispatcher = Dispatcher::new(
            table,
            Arc::new(InMemoryStorage::new()),
            DispatcherConfig::new().with_typing_timer(true),
        );

        let outcome = dispatcher
            .run_turn(
                Activity::message("c1", "msteams").with_text("hi"),
                Arc::new(NoopAdapter),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::SkippedByHook);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn an_already_cancelled_turn_ends_without_saving_state() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(RouteTable::new(), storage.clone(), DispatcherConfig::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = dispatcher
            .run_turn(Activity::message("c1", "msteams"), Arc::new(NoopAdapter), cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(storage
            .read("turn-state", &format!("{}/{}", "msteams", "c1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mention_stripping_runs_before_temp_input_population() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = RouteTable::new();
        table.add_activity(
            [ActivityMatcher::Custom(selector_fn(|ctx: &TurnContext| {
                ctx.activity.text.as_deref() == Some("what's up?")
            }))],
            Arc::new(CountingHandler(hits.clone())),
            false,
        );
        let dispatcher = Dispatcher::new(
            table,
            Arc::new(InMemoryStorage::new()),
            DispatcherConfig::new().with_mention_stripping(true),
        );

        let mut activity = Activity::message("c1", "msteams").with_text("@Helper what's up?");
        activity.recipient = Some(beacon_core::ChannelAccount {
            id: "bot1".into(),
            name: Some("Helper".into()),
            aad_object_id: None,
        });

        let outcome = dispatcher
            .run_turn(activity, Arc::new(NoopAdapter), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Dispatched { matched: true });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_key_uses_channel_and_conversation() {
        let activity = Activity::message("conv-1", ChannelId::new("msteams"));
        assert_eq!(state_key(&activity), "msteams/conv-1");
    }
}
