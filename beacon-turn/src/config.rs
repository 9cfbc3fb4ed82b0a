//! Static configuration for a [`crate::Dispatcher`] (§6.5).

use beacon_routing::Selector;
use std::sync::Arc;

/// The non-authorization subset of §6.5's configuration options — the
/// authorization block itself lives in `beacon-auth::AuthorizationConfig`
/// and is handed to the [`beacon_auth::AuthFlow`] implementation the
/// dispatcher is built with, not duplicated here.
#[derive(Clone, Default)]
pub struct DispatcherConfig {
    /// Emit a typing activity every second while a message turn is in
    /// progress, until an outbound activity is sent or the turn ends.
    pub start_typing_timer: bool,
    /// Strip a leading `@<recipient>` mention from `activity.text`
    /// before state load.
    pub remove_recipient_mention: bool,
    /// When set, a selector that decides whether the sign-in detour
    /// should run even when no flow is already pending. `None` means
    /// the detour only ever resumes a flow already marked pending in
    /// state.
    pub auto_sign_in: Option<Arc<dyn Selector>>,
}

impl DispatcherConfig {
    /// A config with every option at its §6.5 default (`false`, `false`,
    /// no auto sign-in).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the typing timer.
    pub fn with_typing_timer(mut self, enabled: bool) -> Self {
        self.start_typing_timer = enabled;
        self
    }

    /// Enable recipient-mention stripping.
    pub fn with_mention_stripping(mut self, enabled: bool) -> Self {
        self.remove_recipient_mention = enabled;
        self
    }

    /// Set the auto-sign-in selector.
    pub fn with_auto_sign_in(mut self, selector: Arc<dyn Selector>) -> Self {
        self.auto_sign_in = Some(selector);
        self
    }
}
