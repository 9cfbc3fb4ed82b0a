#![deny(missing_docs)]
//! The user-authorization flow machine for beacon.
//!
//! This crate owns the sign-in lifecycle a turn goes through when a
//! handler needs a user token it doesn't already have: starting an
//! OAuth card, correlating the continue activity that completes it,
//! exchanging the result on-behalf-of a downstream API, and retiring
//! the flow state once the user is authenticated. `beacon-turn`'s
//! dispatcher calls into this machine at the sign-in detour step of
//! the turn lifecycle; it never runs the state machine itself.
//!
//! ## Separation of concerns
//!
//! [`TokenServiceClient`] is the boundary to whatever channel-hosted
//! token service actually talks to Azure AD / the bot connector — this
//! crate never constructs HTTP requests itself. [`AuthFlow`] is the
//! flow machine's public contract; [`OAuthFlow`] is the standard
//! implementation, and [`teams::TeamsSsoFlow`] wraps it with the Teams
//! silent-cache specialization (§4.4.6).

pub mod flow;
pub mod keys;
pub mod teams;

use async_trait::async_trait;
use beacon_core::{Activity, ActivityType, BeaconError, ChannelId, Storage, TurnContext};
use flow::FlowState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A token handed back by the token service, plus the connection it
/// came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The connection name this token was issued for.
    pub connection_name: String,
    /// The bearer token value.
    pub token: String,
    /// Expiry, in seconds since the Unix epoch, if the service reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}

/// What the token service returns when it wants the user to complete
/// an interactive sign-in: a card plus the link to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResource {
    /// The URL the user should be sent to.
    pub sign_in_link: String,
    /// The token-exchange resource, when the connection supports SSO.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_exchange_resource_id: Option<String>,
}

/// The normalized outcome of a `get_token_status` call (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// A token is present and unexpired.
    SignedIn,
    /// No token on file.
    SignedOut,
}

/// The boundary to the channel-hosted token service (§6.4).
///
/// Implementations normalize their backend's status codes per §7:
/// a 404 on `get_token` is `Ok(None)`, not an error; a 400 on
/// `exchange_token` becomes [`BeaconError::ConsentRequired`]; a 500
/// becomes a [`BeaconError::Other`] wrapping the backend's detail.
#[async_trait]
pub trait TokenServiceClient: Send + Sync {
    /// Fetch a cached user token for `connection_name`, if one exists.
    async fn get_token(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<Option<TokenResponse>, BeaconError>;

    /// Exchange a continue activity's payload (a magic code, or a
    /// token-exchange invoke's value) for a token.
    async fn exchange_token(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
        exchange_value: &serde_json::Value,
    ) -> Result<TokenResponse, BeaconError>;

    /// Build the sign-in card resource for `connection_name`.
    async fn get_sign_in_resource(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<SignInResource, BeaconError>;

    /// Revoke any cached token for `connection_name`.
    async fn sign_out(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<(), BeaconError>;

    /// Whether the user is currently signed in on `connection_name`.
    async fn get_token_status(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<TokenStatus, BeaconError>;

    /// Fetch AAD tokens for the resource URLs the caller names, keyed
    /// by resource URL.
    async fn get_aad_tokens(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
        resource_urls: &[String],
    ) -> Result<std::collections::HashMap<String, TokenResponse>, BeaconError>;

    /// `get_token`, falling back to a [`SignInResource`] when no token
    /// is cached, in one round trip.
    async fn get_token_or_sign_in_resource(
        &self,
        connection_name: &str,
        channel_id: &ChannelId,
        user_id: &str,
    ) -> Result<Result<TokenResponse, SignInResource>, BeaconError>;
}

/// On-behalf-of token exchange for a named connection (§4.4.5).
///
/// A connection that does not implement this trait cannot be used as
/// an `obo_connection_name` — [`OAuthFlow`] surfaces
/// [`BeaconError::OboNotSupported`] rather than silently skipping the
/// exchange.
#[async_trait]
pub trait OboProvider: Send + Sync {
    /// Exchange `user_token` for a token scoped to `scopes` on behalf
    /// of the signed-in user.
    async fn exchange(
        &self,
        user_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, Box<dyn std::error::Error + Send + Sync>>;
}

/// Configuration for one [`OAuthFlow`] (§6.5 `authorization` block).
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// The bot-connection name the token service should use.
    pub connection_name: String,
    /// How long a started flow stays valid before it times out.
    pub timeout: Duration,
    /// Named connection to exchange the user token against on-behalf-of,
    /// if configured.
    pub obo_connection_name: Option<String>,
    /// Scopes requested from the OBO exchange.
    pub obo_scopes: Vec<String>,
    /// Whether this connection supports SSO token-exchange invokes and
    /// therefore needs the dedupe sentinel (§4.4.4).
    pub enable_sso: bool,
    /// How many invalid continue attempts are tolerated before the
    /// flow errors out with `invalid-sign-in`.
    pub invalid_sign_in_retry_max: u32,
    /// Message sent back to the user on an invalid continue attempt
    /// that did not exhaust the retry budget.
    pub invalid_sign_in_retry_message: Option<String>,
    /// Whether an invalid continue attempt that exhausts the retry
    /// budget ends the turn (vs. letting routing continue).
    pub end_on_invalid_message: bool,
}

impl AuthorizationConfig {
    /// Build a config for `connection_name` with every other field at
    /// its §6.5 default.
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            timeout: Duration::from_millis(900_000),
            obo_connection_name: None,
            obo_scopes: Vec::new(),
            enable_sso: false,
            invalid_sign_in_retry_max: 2,
            invalid_sign_in_retry_message: None,
            end_on_invalid_message: true,
        }
    }

    /// Set the on-behalf-of connection and scopes.
    pub fn with_obo(mut self, connection_name: impl Into<String>, scopes: Vec<String>) -> Self {
        self.obo_connection_name = Some(connection_name.into());
        self.obo_scopes = scopes;
        self
    }

    /// Enable SSO dedupe handling.
    pub fn with_sso(mut self, enable: bool) -> Self {
        self.enable_sso = enable;
        self
    }
}

/// What [`AuthFlow::sign_in`] resolves to (§4.4.1).
///
/// Not `Clone`: [`BeaconError`] carries a boxed source error, so an
/// `Error` outcome is consumed rather than duplicated.
#[derive(Debug)]
pub enum FlowOutcome {
    /// A token is available; the flow is `Completed`.
    Complete(TokenResponse),
    /// User action is required; the flow is now `Started` and the
    /// caller should save state and end the turn without dispatching
    /// routes.
    Pending,
    /// The flow failed. The caller clears the pending marker unless
    /// the source is [`BeaconError::InvalidActivity`] (§4.2 step 5).
    Error(BeaconError),
}

/// The public contract of the sign-in flow machine (§4.4.1).
#[async_trait]
pub trait AuthFlow: Send + Sync {
    /// Return a cached or freshly acquired token, start a flow if one
    /// is needed, or report an error. `force` restarts the flow even
    /// if a token is cached.
    async fn sign_in(
        &self,
        ctx: &TurnContext,
        force: bool,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> FlowOutcome;

    /// Clear flow state and revoke the cached token.
    async fn sign_out(&self, ctx: &TurnContext) -> Result<(), BeaconError>;

    /// Clear flow state without revoking anything.
    async fn reset_state(&self, ctx: &TurnContext) -> Result<(), BeaconError>;

    /// Re-read the cached token and, if OBO is configured, re-run the
    /// exchange.
    async fn get_refreshed_user_token(
        &self,
        ctx: &TurnContext,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> Result<TokenResponse, BeaconError>;

    /// Whether `activity` can carry sign-in semantics at all (§4.4.2).
    /// The dispatcher uses this to decide whether the sign-in detour
    /// applies before calling [`AuthFlow::sign_in`].
    fn is_valid_activity(&self, activity: &Activity) -> bool;
}

fn channel_user_key(ctx: &TurnContext) -> (ChannelId, String) {
    let channel = ctx.activity.channel_id.clone();
    let user = ctx
        .activity
        .from
        .as_ref()
        .map(|a| a.id.clone())
        .unwrap_or_default();
    (channel, user)
}

/// The channel family §4.4.2 scopes the immediate-expiry-check to.
/// `ChannelId::matches` compares bare channels, so `msteams:COPILOT`
/// and similar sub-channels are included.
const TEAMS_CHANNEL_FAMILY: &str = "msteams";

fn invoke_name_is_signin(activity: &Activity) -> bool {
    matches!(
        activity.name.as_deref(),
        Some("signin/verifyState") | Some("signin/tokenExchange") | Some("signin/failure")
    )
}

/// Decode a JWT's payload segment (no signature verification — the
/// token service is the trust boundary, this only inspects the `aud`
/// claim to route the OBO exchange per §4.4.5).
fn decode_jwt_aud(token: &str) -> Option<String> {
    use base64::Engine;
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("aud")?.as_str().map(str::to_owned)
}

/// The standard OAuth sign-in flow machine (§4.4.3–§4.4.5).
///
/// One `OAuthFlow` is configured per authorization connection. Flow
/// state lives in [`Storage`] under the key [`keys::oauth_flow_key`]
/// derives, so a flow survives process restarts and is safe to share
/// across turns — the `OAuthFlow` value itself holds no per-flow state.
pub struct OAuthFlow {
    config: AuthorizationConfig,
    storage: Arc<dyn Storage>,
    token_service: Arc<dyn TokenServiceClient>,
    obo_provider: Option<Arc<dyn OboProvider>>,
}

impl OAuthFlow {
    /// Build a flow around a storage backend and token-service client,
    /// with an optional on-behalf-of provider for the connection named
    /// in `config.obo_connection_name`.
    pub fn new(
        config: AuthorizationConfig,
        storage: Arc<dyn Storage>,
        token_service: Arc<dyn TokenServiceClient>,
        obo_provider: Option<Arc<dyn OboProvider>>,
    ) -> Self {
        Self {
            config,
            storage,
            token_service,
            obo_provider,
        }
    }

    fn flow_key(&self, channel: &ChannelId, conversation_id: &str) -> String {
        keys::oauth_flow_key(&self.config.connection_name, channel, conversation_id)
    }

    fn exchange_connection_for(&self, override_connection: Option<&str>) -> Option<String> {
        override_connection
            .map(str::to_owned)
            .or_else(|| self.config.obo_connection_name.clone())
    }

    /// Run the on-behalf-of exchange over `user_token`, signing the
    /// user out on provider failure (§4.4.5 step 3).
    async fn run_obo(
        &self,
        ctx: &TurnContext,
        user_token: TokenResponse,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> Result<TokenResponse, BeaconError> {
        let connection = match self.exchange_connection_for(exchange_connection) {
            Some(c) => c,
            None => return Ok(user_token),
        };

        let aud = decode_jwt_aud(&user_token.token);
        if !aud.as_deref().is_some_and(|a| a.starts_with("api://")) {
            return Err(BeaconError::OboNotExchangeable);
        }

        let provider = self
            .obo_provider
            .clone()
            .ok_or(BeaconError::OboNotSupported { connection })?;

        let scopes = exchange_scopes
            .map(|s| s.to_vec())
            .unwrap_or_else(|| self.config.obo_scopes.clone());

        match provider.exchange(&user_token.token, &scopes).await {
            Ok(exchanged) => Ok(exchanged),
            Err(source) => {
                let _ = self.sign_out(ctx).await;
                Err(BeaconError::OboExchangeFailed { source })
            }
        }
    }

    async fn continue_flow(
        &self,
        ctx: &TurnContext,
        key: &str,
        state: &mut FlowState,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> FlowOutcome {
        let (channel, user_id) = channel_user_key(ctx);
        let exchange_value = &ctx.activity.value;

        match self
            .token_service
            .exchange_token(&self.config.connection_name, &channel, &user_id, exchange_value)
            .await
        {
            Ok(token) => {
                state.flow_started = false;
                if let Err(e) = flow::write_flow_state(&*self.storage, key, state, None).await {
                    return FlowOutcome::Error(e);
                }
                match self
                    .run_obo(ctx, token, exchange_connection, exchange_scopes)
                    .await
                {
                    Ok(final_token) => FlowOutcome::Complete(final_token),
                    Err(e) => FlowOutcome::Error(e),
                }
            }
            Err(BeaconError::ConsentRequired) => {
                let _ = flow::clear_flow_state(&*self.storage, key).await;
                FlowOutcome::Error(BeaconError::ConsentRequired)
            }
            Err(e) => {
                state.continue_count += 1;
                if state.continue_count >= self.config.invalid_sign_in_retry_max {
                    let _ = flow::clear_flow_state(&*self.storage, key).await;
                    return FlowOutcome::Error(BeaconError::InvalidSignIn {
                        continue_count: state.continue_count,
                        max: self.config.invalid_sign_in_retry_max,
                    });
                }
                if let Err(write_err) =
                    flow::write_flow_state(&*self.storage, key, state, None).await
                {
                    return FlowOutcome::Error(write_err);
                }
                FlowOutcome::Error(e)
            }
        }
    }
}

#[async_trait]
impl AuthFlow for OAuthFlow {
    #[tracing::instrument(skip_all, fields(connection = %self.config.connection_name))]
    async fn sign_in(
        &self,
        ctx: &TurnContext,
        force: bool,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> FlowOutcome {
        let (channel, user_id) = channel_user_key(ctx);
        let conversation_id = ctx.activity.conversation.id.clone();
        let key = self.flow_key(&channel, &conversation_id);

        let (mut state, etag) = match flow::read_flow_state(&*self.storage, &key).await {
            Ok(v) => v,
            Err(e) => return FlowOutcome::Error(e),
        };

        if !force && !state.flow_started {
            match self
                .token_service
                .get_token(&self.config.connection_name, &channel, &user_id)
                .await
            {
                Ok(Some(token)) => {
                    return match self
                        .run_obo(ctx, token, exchange_connection, exchange_scopes)
                        .await
                    {
                        Ok(final_token) => FlowOutcome::Complete(final_token),
                        Err(e) => FlowOutcome::Error(e),
                    };
                }
                Ok(None) => {}
                Err(e) => return FlowOutcome::Error(e),
            }
        }

        if state.flow_started {
            // §4.4.2: only the Teams channel family fails a stale flow
            // immediately, before even attempting the continue step —
            // other channels fall through to `continue_flow` and let the
            // normal retry/error path (§4.4.3) handle a flow that never
            // completes.
            if channel.matches(&ChannelId::new(TEAMS_CHANNEL_FAMILY)) && state.is_expired(SystemTime::now()) {
                let _ = flow::clear_flow_state(&*self.storage, &key).await;
                return FlowOutcome::Error(BeaconError::Timeout { conversation_id });
            }
            return self
                .continue_flow(ctx, &key, &mut state, exchange_connection, exchange_scopes)
                .await;
        }

        // Idle -> Started.
        let mut etag = etag;
        if self.config.enable_sso {
            match flow::write_flow_state(&*self.storage, &key, &FlowState::default(), None).await
            {
                Ok(new_etag) => etag = Some(new_etag),
                Err(BeaconError::EtagMismatch { .. }) => return FlowOutcome::Pending,
                Err(e) => return FlowOutcome::Error(e),
            }
        }
        state.start(self.config.timeout);
        if let Err(e) =
            flow::write_flow_state(&*self.storage, &key, &state, etag.as_deref()).await
        {
            return FlowOutcome::Error(e);
        }

        match self
            .token_service
            .get_sign_in_resource(&self.config.connection_name, &channel, &user_id)
            .await
        {
            Ok(resource) => {
                if let Err(e) = ctx
                    .send_activity(
                        ctx.activity
                            .reply(ActivityType::Event)
                            .with_text(&resource.sign_in_link),
                    )
                    .await
                {
                    return FlowOutcome::Error(e);
                }
                FlowOutcome::Pending
            }
            Err(e) => FlowOutcome::Error(e),
        }
    }

    async fn sign_out(&self, ctx: &TurnContext) -> Result<(), BeaconError> {
        let (channel, user_id) = channel_user_key(ctx);
        self.token_service
            .sign_out(&self.config.connection_name, &channel, &user_id)
            .await?;
        let key = self.flow_key(&channel, &ctx.activity.conversation.id);
        flow::clear_flow_state(&*self.storage, &key).await
    }

    async fn reset_state(&self, ctx: &TurnContext) -> Result<(), BeaconError> {
        let (channel, _) = channel_user_key(ctx);
        let key = self.flow_key(&channel, &ctx.activity.conversation.id);
        flow::clear_flow_state(&*self.storage, &key).await
    }

    async fn get_refreshed_user_token(
        &self,
        ctx: &TurnContext,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> Result<TokenResponse, BeaconError> {
        let (channel, user_id) = channel_user_key(ctx);
        let token = self
            .token_service
            .get_token(&self.config.connection_name, &channel, &user_id)
            .await?
            .ok_or_else(|| BeaconError::SignInError {
                reason: "no cached token to refresh".into(),
            })?;
        self.run_obo(ctx, token, exchange_connection, exchange_scopes)
            .await
    }

    fn is_valid_activity(&self, activity: &Activity) -> bool {
        activity.is_message() || invoke_name_is_signin(activity)
    }
}
