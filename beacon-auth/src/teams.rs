//! The Teams SSO specialization of the sign-in flow machine (§4.4.6).
//!
//! Teams carries its own silent-token path: before ever showing an
//! OAuth card, the flow checks a long-running MSAL cache keyed by
//! `<aad_object_id>.<tenant_id>`. Only on a cache miss does it fall
//! back to the card-and-exchange dance [`OAuthFlow`] already
//! implements — this wraps an inner flow rather than duplicating its
//! state machine.

use crate::keys::{new_exchange_id, sso_flow_key};
use crate::{AuthFlow, FlowOutcome, TokenResponse};
use async_trait::async_trait;
use beacon_core::{Activity, ActivityType, BeaconError, InvokeResponse, Storage, TurnContext};
use std::sync::Arc;

/// The MSAL long-running-process token cache Teams SSO reads before
/// showing a card.
///
/// `cache_key` is `<aad_object_id>.<tenant_id>` per §4.4.6; callers
/// outside this crate never construct that string directly.
#[async_trait]
pub trait MsalCache: Send + Sync {
    /// A cached token for `cache_key`, if the silent acquisition would
    /// succeed.
    async fn get(&self, cache_key: &str) -> Result<Option<TokenResponse>, BeaconError>;

    /// Start (or resume) the long-running process that will populate
    /// the cache for `cache_key` once the token-exchange invoke's
    /// payload is processed.
    async fn start_long_running_process(
        &self,
        cache_key: &str,
        exchange_value: &serde_json::Value,
    ) -> Result<TokenResponse, Box<dyn std::error::Error + Send + Sync>>;
}

/// Error returned by [`MsalCache::start_long_running_process`] when
/// MSAL reports that interactive UI is required — the caller maps
/// this to an HTTP 412 with `FailureDetail` (§4.4.6) rather than a
/// generic sign-in error.
#[derive(Debug)]
pub struct UiRequired(pub String);

impl std::fmt::Display for UiRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interaction required: {}", self.0)
    }
}

impl std::error::Error for UiRequired {}

fn cache_key_for(activity: &Activity) -> Option<String> {
    let aad_object_id = activity.from.as_ref()?.aad_object_id.as_deref()?;
    let tenant_id = activity.conversation.tenant_id.as_deref()?;
    Some(format!("{aad_object_id}.{tenant_id}"))
}

/// Build the sign-in link Teams renders on the OAuth card:
/// `<base>?scope=<space-joined-scopes>&clientId=<c>&tenantId=<t>`.
pub fn sign_in_link(base: &str, scopes: &[String], client_id: &str, tenant_id: &str) -> String {
    format!(
        "{base}?scope={}&clientId={client_id}&tenantId={tenant_id}",
        scopes.join(" ")
    )
}

/// Teams SSO's wrapper around a standard [`OAuthFlow`](crate::OAuthFlow):
/// silent cache lookup first, OAuth card and token-exchange invoke
/// handling second.
pub struct TeamsSsoFlow<F: AuthFlow> {
    inner: F,
    storage: Arc<dyn Storage>,
    cache: Arc<dyn MsalCache>,
    auth_name: String,
    card_base_url: String,
    client_id: String,
    scopes: Vec<String>,
}

impl<F: AuthFlow> TeamsSsoFlow<F> {
    /// Wrap `inner` with the Teams silent-cache specialization.
    pub fn new(
        inner: F,
        storage: Arc<dyn Storage>,
        cache: Arc<dyn MsalCache>,
        auth_name: impl Into<String>,
        card_base_url: impl Into<String>,
        client_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            inner,
            storage,
            cache,
            auth_name: auth_name.into(),
            card_base_url: card_base_url.into(),
            client_id: client_id.into(),
            scopes,
        }
    }

    async fn send_oauth_card(&self, ctx: &TurnContext, exchange_id: &str) -> Result<(), BeaconError> {
        let tenant_id = ctx
            .activity
            .conversation
            .tenant_id
            .clone()
            .unwrap_or_default();
        let link = sign_in_link(&self.card_base_url, &self.scopes, &self.client_id, &tenant_id);
        ctx.send_activity(
            ctx.activity
                .reply(ActivityType::Event)
                .with_text(&format!("{link}&exchangeId={exchange_id}")),
        )
        .await?;
        Ok(())
    }

    fn flow_key(&self, ctx: &TurnContext, exchange_id: &str) -> String {
        sso_flow_key(
            &self.auth_name,
            &ctx.activity.channel_id,
            &ctx.activity.conversation.id,
            exchange_id,
        )
    }

    /// Handle a `signin/tokenExchange` or `signin/verifyState` invoke,
    /// returning the [`InvokeResponse`] the dispatcher sends back
    /// synchronously (§4.4.6).
    pub async fn handle_invoke(&self, ctx: &TurnContext) -> Result<InvokeResponse, BeaconError> {
        match ctx.activity.name.as_deref() {
            Some("signin/tokenExchange") => self.handle_token_exchange(ctx).await,
            Some("signin/verifyState") => {
                let exchange_id = new_exchange_id(&self.auth_name);
                self.send_oauth_card(ctx, &exchange_id).await?;
                Ok(InvokeResponse::accepted())
            }
            _ => Ok(InvokeResponse::error(400, "unsupported invoke name")),
        }
    }

    async fn handle_token_exchange(&self, ctx: &TurnContext) -> Result<InvokeResponse, BeaconError> {
        let exchange_id = ctx
            .activity
            .value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let key = self.flow_key(ctx, exchange_id);

        // Dedupe: the sentinel write is create-only, so a second
        // concurrent invoke for the same exchange id is dropped.
        if let Err(BeaconError::EtagMismatch { .. }) = crate::flow::write_flow_state(
            &*self.storage,
            &key,
            &crate::flow::FlowState::default(),
            None,
        )
        .await
        {
            return Ok(InvokeResponse::accepted());
        }

        let Some(cache_key) = cache_key_for(&ctx.activity) else {
            return Ok(InvokeResponse::error(
                400,
                "activity is missing aad_object_id/tenant_id",
            ));
        };

        match self
            .cache
            .start_long_running_process(&cache_key, &ctx.activity.value)
            .await
        {
            Ok(_token) => {
                let _ = crate::flow::clear_flow_state(&*self.storage, &key).await;
                Ok(InvokeResponse::accepted())
            }
            Err(source) => {
                let _ = crate::flow::clear_flow_state(&*self.storage, &key).await;
                if source.downcast_ref::<UiRequired>().is_some() {
                    Ok(InvokeResponse::error(412, source.to_string()))
                } else {
                    Err(BeaconError::SignInError {
                        reason: source.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl<F: AuthFlow> AuthFlow for TeamsSsoFlow<F> {
    async fn sign_in(
        &self,
        ctx: &TurnContext,
        force: bool,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> FlowOutcome {
        if !force {
            if let Some(cache_key) = cache_key_for(&ctx.activity) {
                match self.cache.get(&cache_key).await {
                    Ok(Some(token)) => return FlowOutcome::Complete(token),
                    Ok(None) => {}
                    Err(e) => return FlowOutcome::Error(e),
                }
            }
        }

        if ctx.activity.is_invoke() {
            return match self.handle_invoke(ctx).await {
                Ok(response) => {
                    ctx.set_invoke_response(response);
                    FlowOutcome::Pending
                }
                Err(e) => FlowOutcome::Error(e),
            };
        }

        let exchange_id = new_exchange_id(&self.auth_name);
        if let Err(e) = self.send_oauth_card(ctx, &exchange_id).await {
            return FlowOutcome::Error(e);
        }
        self.inner
            .sign_in(ctx, force, exchange_connection, exchange_scopes)
            .await
    }

    async fn sign_out(&self, ctx: &TurnContext) -> Result<(), BeaconError> {
        self.inner.sign_out(ctx).await
    }

    async fn reset_state(&self, ctx: &TurnContext) -> Result<(), BeaconError> {
        self.inner.reset_state(ctx).await
    }

    async fn get_refreshed_user_token(
        &self,
        ctx: &TurnContext,
        exchange_connection: Option<&str>,
        exchange_scopes: Option<&[String]>,
    ) -> Result<TokenResponse, BeaconError> {
        self.inner
            .get_refreshed_user_token(ctx, exchange_connection, exchange_scopes)
            .await
    }

    fn is_valid_activity(&self, activity: &Activity) -> bool {
        self.inner.is_valid_activity(activity)
    }
}
