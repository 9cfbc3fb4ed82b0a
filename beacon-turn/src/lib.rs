#![deny(missing_docs)]
//! # beacon-turn — the per-activity turn dispatcher
//!
//! [`Dispatcher`] runs one activity through the full turn lifecycle
//! (§4.2): validate, start the typing timer, strip a leading recipient
//! mention, load conversation state, run the sign-in detour against a
//! [`beacon_auth::AuthFlow`], populate `temp.input`, run before-turn
//! hooks, dispatch a route from `beacon-routing`'s [`beacon_routing::RouteTable`],
//! run after-turn hooks, and save state — stopping the typing timer in
//! every exit path.

pub mod config;
pub mod dispatcher;
pub mod mention;
pub mod typing;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, TurnOutcome};
pub use mention::strip_recipient_mention;
pub use typing::TypingTimer;
