#![deny(missing_docs)]
//! Route table and before/after turn hooks for beacon (§4.1).
//!
//! A [`RouteTable`] holds two ordered sequences of routes — invoke
//! routes and general routes — plus the before/after turn hook
//! pipelines. [`RouteTable::dispatch`] evaluates selectors in
//! registration order and runs the first match; the dispatcher in
//! `beacon-turn` owns the rest of the turn lifecycle.

use async_trait::async_trait;
use beacon_core::{ActivityType, BeaconError, TurnContext, TurnState};
use regex::Regex;
use std::sync::Arc;

/// Decides whether a route's handler should run for this turn.
///
/// Selectors may suspend (§5) — e.g. a selector that checks a feature
/// flag in storage — so this is an async trait rather than a plain
/// `Fn(&TurnContext) -> bool`.
#[async_trait]
pub trait Selector: Send + Sync {
    /// Evaluate this selector against the turn's context.
    async fn matches(&self, ctx: &TurnContext) -> bool;
}

/// What a matched route does with the turn.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Run this route's handler.
    async fn handle(&self, ctx: &TurnContext, state: &mut dyn TurnState) -> Result<(), BeaconError>;
}

/// A before-turn or after-turn pipeline step (§4.2 steps 7 and 9).
///
/// Returns `false` to short-circuit the remaining pipeline.
#[async_trait]
pub trait TurnHook: Send + Sync {
    /// Run this hook. `Ok(false)` halts the remaining pipeline.
    async fn run(&self, ctx: &TurnContext, state: &mut dyn TurnState) -> Result<bool, BeaconError>;
}

/// Wraps a plain synchronous predicate as a [`Selector`].
struct SyncSelector<F>(F);

#[async_trait]
impl<F> Selector for SyncSelector<F>
where
    F: Fn(&TurnContext) -> bool + Send + Sync,
{
    async fn matches(&self, ctx: &TurnContext) -> bool {
        (self.0)(ctx)
    }
}

/// Build a [`Selector`] from a synchronous predicate.
pub fn selector_fn<F>(f: F) -> Arc<dyn Selector>
where
    F: Fn(&TurnContext) -> bool + Send + Sync + 'static,
{
    Arc::new(SyncSelector(f))
}

/// Matches an activity by exact type, by an exact (case-insensitive)
/// invoke name, or by a regular expression over the invoke name. The
/// three arms correspond to the `type_matcher` overloads in §4.1's
/// `add_activity`.
pub enum ActivityMatcher {
    /// Match `activity.activity_type` exactly.
    Type(ActivityType),
    /// Match `activity.name` case-insensitively (invoke routes use
    /// this for names like `signin/verifyState`).
    Name(String),
    /// Match `activity.name` against a compiled regular expression.
    NamePattern(Regex),
    /// An arbitrary selector, for anything the other arms can't express.
    Custom(Arc<dyn Selector>),
}

#[async_trait]
impl Selector for ActivityMatcher {
    async fn matches(&self, ctx: &TurnContext) -> bool {
        match self {
            ActivityMatcher::Type(t) => &ctx.activity.activity_type == t,
            ActivityMatcher::Name(name) => ctx
                .activity
                .name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name)),
            ActivityMatcher::NamePattern(re) => {
                ctx.activity.name.as_deref().is_some_and(|n| re.is_match(n))
            }
            ActivityMatcher::Custom(selector) => selector.matches(ctx).await,
        }
    }
}

struct Route {
    selector: Arc<dyn Selector>,
    handler: Arc<dyn RouteHandler>,
}

/// Ordered route registration and first-match dispatch (§4.1).
///
/// Invoke activities are matched against `invoke_routes` first; if
/// none match, they fall through to `general_routes`. Non-invoke
/// activities skip `invoke_routes` entirely. Within either list,
/// registration order is preserved and the first matching selector
/// wins (Invariant R1, P1).
#[derive(Default)]
pub struct RouteTable {
    invoke_routes: Vec<Route>,
    general_routes: Vec<Route>,
    before_hooks: Vec<Arc<dyn TurnHook>>,
    after_hooks: Vec<Arc<dyn TurnHook>>,
}

impl RouteTable {
    /// An empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. No deduplication — registering the same
    /// selector twice runs the handler once for whichever copy
    /// matches first.
    pub fn add(&mut self, selector: Arc<dyn Selector>, handler: Arc<dyn RouteHandler>, is_invoke: bool) {
        let route = Route { selector, handler };
        if is_invoke {
            self.invoke_routes.push(route);
        } else {
            self.general_routes.push(route);
        }
    }

    /// Convenience wrapper over [`ActivityMatcher`]. A `Vec` of
    /// matchers expands to N separate registrations sharing the same
    /// handler, per §4.1's "multi-selector overloads expand to N
    /// separate registrations."
    pub fn add_activity(
        &mut self,
        matchers: impl IntoIterator<Item = ActivityMatcher>,
        handler: Arc<dyn RouteHandler>,
        is_invoke: bool,
    ) {
        for matcher in matchers {
            self.add(Arc::new(matcher), Arc::clone(&handler), is_invoke);
        }
    }

    /// Append a before-turn hook (§4.2 step 7).
    pub fn before_turn(&mut self, hook: Arc<dyn TurnHook>) {
        self.before_hooks.push(hook);
    }

    /// Append an after-turn hook (§4.2 step 9).
    pub fn after_turn(&mut self, hook: Arc<dyn TurnHook>) {
        self.after_hooks.push(hook);
    }

    /// Run the before-turn hooks in registration order. `Ok(false)`
    /// means a hook vetoed — the caller should save state and stop
    /// without dispatching a route.
    pub async fn run_before_hooks(
        &self,
        ctx: &TurnContext,
        state: &mut dyn TurnState,
    ) -> Result<bool, BeaconError> {
        for hook in &self.before_hooks {
            if !hook.run(ctx, state).await? {
                tracing::debug!("before-turn hook short-circuited the turn");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run the after-turn hooks in registration order. `Ok(false)`
    /// means a hook vetoed — the caller should skip the state save.
    pub async fn run_after_hooks(
        &self,
        ctx: &TurnContext,
        state: &mut dyn TurnState,
    ) -> Result<bool, BeaconError> {
        for hook in &self.after_hooks {
            if !hook.run(ctx, state).await? {
                tracing::debug!("after-turn hook vetoed the state save");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate selectors in order and run the first match (Invariant
    /// P1, P2). Returns whether a route was found and run.
    pub async fn dispatch(
        &self,
        ctx: &TurnContext,
        state: &mut dyn TurnState,
    ) -> Result<bool, BeaconError> {
        if ctx.activity.is_invoke() {
            if let Some(route) = Self::find(&self.invoke_routes, ctx).await {
                route.handler.handle(ctx, state).await?;
                return Ok(true);
            }
        }
        if let Some(route) = Self::find(&self.general_routes, ctx).await {
            route.handler.handle(ctx, state).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn find<'a>(routes: &'a [Route], ctx: &TurnContext) -> Option<&'a Route> {
        for route in routes {
            if route.selector.matches(ctx).await {
                return Some(route);
            }
        }
        None
    }
}
