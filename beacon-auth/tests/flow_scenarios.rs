//! End-to-end scenarios for the sign-in flow machine: first-touch,
//! timeout, SSO dedupe, and the configuration boundaries around the
//! invalid-continue retry budget.

use async_trait::async_trait;
use beacon_auth::{
    AuthFlow, AuthorizationConfig, FlowOutcome, OAuthFlow, SignInResource, TokenResponse,
    TokenServiceClient, TokenStatus,
};
use beacon_core::{
    Activity, ActivityType, Adapter, BeaconError, ChannelId, ResourceResponse, Storage,
    StorageRecord, TurnContext,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

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

fn ctx(activity: Activity) -> TurnContext {
    TurnContext::new(activity, Arc::new(NoopAdapter), CancellationToken::new())
}

struct ScriptedTokenService {
    token: Mutex<Option<TokenResponse>>,
    exchange_results: Mutex<Vec<Result<TokenResponse, BeaconError>>>,
}

impl ScriptedTokenService {
    fn new() -> Self {
        Self {
            token: Mutex::new(None),
            exchange_results: Mutex::new(Vec::new()),
        }
    }

    fn push_exchange_failure(&self, reason: &str) {
        self.exchange_results
            .lock()
            .unwrap()
            .push(Err(BeaconError::SignInError {
                reason: reason.to_owned(),
            }));
    }
}

#[async_trait]
impl TokenServiceClient for ScriptedTokenService {
    async fn get_token(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
    ) -> Result<Option<TokenResponse>, BeaconError> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn exchange_token(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
        _exchange_value: &serde_json::Value,
    ) -> Result<TokenResponse, BeaconError> {
        let mut results = self.exchange_results.lock().unwrap();
        if results.is_empty() {
            return Ok(TokenResponse {
                connection_name: "graph".into(),
                token: "tok".into(),
                expiration: None,
            });
        }
        results.remove(0)
    }

    async fn get_sign_in_resource(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
    ) -> Result<SignInResource, BeaconError> {
        Ok(SignInResource {
            sign_in_link: "https://sign-in.example/".into(),
            token_exchange_resource_id: None,
        })
    }

    async fn sign_out(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
    ) -> Result<(), BeaconError> {
        *self.token.lock().unwrap() = None;
        Ok(())
    }

    async fn get_token_status(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
    ) -> Result<TokenStatus, BeaconError> {
        Ok(TokenStatus::SignedOut)
    }

    async fn get_aad_tokens(
        &self,
        _connection_name: &str,
        _channel_id: &ChannelId,
        _user_id: &str,
        _resource_urls: &[String],
    ) -> Result<HashMap<String, TokenResponse>, BeaconError> {
        Ok(HashMap::new())
    }

    async fn get_token_or_sign_in_resource(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<Result<TokenResponse, SignInResource>, BeaconError> {
        match self.get_token(connection_name, channel_id, user_id).await? {
            Some(t) => Ok(Ok(t)),
            None => Ok(Err(self
                .get_sign_in_resource(connection_name, channel_id, user_id)
                .await?)),
        }
    }
}

// S3 — sign-in first-touch.
#[tokio::test]
async fn sign_in_first_touch_starts_a_flow() {
    let storage = Arc::new(InMemoryStorage::new());
    let service = Arc::new(ScriptedTokenService::new());
    let flow = OAuthFlow::new(AuthorizationConfig::new("graph"), storage.clone(), service, None);
    let turn = ctx(Activity::message("c2", "msteams").with_text("hi"));

    let outcome = flow.sign_in(&turn, false, None, None).await;
    assert!(matches!(outcome, FlowOutcome::Pending));

    let key = beacon_auth::keys::oauth_flow_key("graph", &ChannelId::new("msteams"), "c2");
    let record = storage.read("auth-flow", &key).await.unwrap().unwrap();
    assert_eq!(record.value["flow_started"], true);
    assert!(record.value["flow_expires_ms"].as_u64().unwrap() > 0);
}

// S4 — sign-in timeout.
#[tokio::test]
async fn expired_flow_fails_with_timeout_and_reset_clears_it() {
    let storage = Arc::new(InMemoryStorage::new());
    let service = Arc::new(ScriptedTokenService::new());
    let flow = OAuthFlow::new(AuthorizationConfig::new("graph"), storage.clone(), service, None);

    let key = beacon_auth::keys::oauth_flow_key("graph", &ChannelId::new("msteams"), "c3");
    let expired = serde_json::json!({
        "flow_started": true,
        "flow_expires_ms": 1u64,
        "continue_count": 0,
    });
    storage.write("auth-flow", &key, expired, None).await.unwrap();

    let turn = ctx(Activity::message("c3", "msteams").with_text("42"));
    let outcome = flow.sign_in(&turn, false, None, None).await;
    assert!(matches!(
        outcome,
        FlowOutcome::Error(BeaconError::Timeout { .. })
    ));

    flow.reset_state(&turn).await.unwrap();
    assert!(storage.read("auth-flow", &key).await.unwrap().is_none());
}

// S5 — SSO dedupe: two concurrent token-exchange invokes with the same
// correlation collide on the sentinel; only one proceeds.
#[tokio::test]
async fn concurrent_sso_exchanges_for_the_same_key_collide() {
    let key = beacon_auth::keys::sso_flow_key("graph", &ChannelId::new("msteams"), "c4", "ex1-graph");
    let storage = Arc::new(InMemoryStorage::new());

    let first = beacon_auth::flow::write_flow_state(
        &*storage,
        &key,
        &beacon_auth::flow::FlowState::default(),
        None,
    )
    .await;
    assert!(first.is_ok(), "first writer should create the sentinel");

    let second = beacon_auth::flow::write_flow_state(
        &*storage,
        &key,
        &beacon_auth::flow::FlowState::default(),
        None,
    )
    .await;
    assert!(
        matches!(second, Err(BeaconError::EtagMismatch { .. })),
        "second concurrent writer must collide, got {second:?}"
    );
}

// P7 boundary — invalid_sign_in_retry_max = 0 raises immediately.
#[tokio::test]
async fn zero_retry_budget_raises_invalid_sign_in_on_first_bad_continue() {
    let storage = Arc::new(InMemoryStorage::new());
    let service = Arc::new(ScriptedTokenService::new());
    service.push_exchange_failure("bad code");
    let mut config = AuthorizationConfig::new("graph");
    config.invalid_sign_in_retry_max = 0;
    let flow = OAuthFlow::new(config, storage, service, None);

    let turn = ctx(Activity::message("c5", "msteams"));
    flow.sign_in(&turn, false, None, None).await;

    let mut continue_activity = Activity::message("c5", "msteams");
    continue_activity.activity_type = ActivityType::Invoke;
    continue_activity.name = Some("signin/verifyState".into());

    let outcome = flow.sign_in(&ctx(continue_activity), false, None, None).await;
    match outcome {
        FlowOutcome::Error(BeaconError::InvalidSignIn { continue_count, max }) => {
            assert_eq!(continue_count, 1);
            assert_eq!(max, 0);
        }
        other => panic!("expected InvalidSignIn immediately, got {other:?}"),
    }
}

// §8.2 idempotence — sign_out and reset_state are both no-ops the
// second time around.
#[tokio::test]
async fn sign_out_and_reset_state_are_idempotent() {
    let storage = Arc::new(InMemoryStorage::new());
    let service = Arc::new(ScriptedTokenService::new());
    let flow = OAuthFlow::new(AuthorizationConfig::new("graph"), storage, service, None);
    let turn = ctx(Activity::message("c6", "msteams"));

    flow.sign_out(&turn).await.unwrap();
    flow.sign_out(&turn).await.unwrap();
    flow.reset_state(&turn).await.unwrap();
    flow.reset_state(&turn).await.unwrap();
}

// §8.3 boundary — an empty-route-table-equivalent: sign-in against a
// connection with no configuration beyond defaults still saves state
// and completes normally once a token exists.
#[tokio::test]
async fn cached_token_path_requires_no_flow_state_at_all() {
    let storage = Arc::new(InMemoryStorage::new());
    let service = Arc::new(ScriptedTokenService::new());
    *service.token.lock().unwrap() = Some(TokenResponse {
        connection_name: "graph".into(),
        token: "cached".into(),
        expiration: None,
    });
    let flow = OAuthFlow::new(AuthorizationConfig::new("graph"), storage.clone(), service, None);
    let turn = ctx(Activity::message("c7", "msteams"));

    let outcome = flow.sign_in(&turn, false, None, None).await;
    assert!(matches!(outcome, FlowOutcome::Complete(_)));

    let key = beacon_auth::keys::oauth_flow_key("graph", &ChannelId::new("msteams"), "c7");
    assert!(storage.read("auth-flow", &key).await.unwrap().is_none());
}
