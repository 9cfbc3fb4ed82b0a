#![deny(missing_docs)]
//! # beacon — conversational agent runtime core
//!
//! A single import surface for composing the runtime: the route table
//! and turn dispatcher (§4.1, §4.2), the OAuth/SSO sign-in flow machine
//! (§4.3, §4.4), the background activity queue (§4.5), the streaming
//! response multiplexer (§4.6), and the [`ChannelAdapter`] that wires
//! §4.7's delivery-mode routing between them. Everything here is
//! feature-gated, with a `prelude` module re-exporting the types most
//! callers need for its own umbrella crate.
//!
//! HTTP hosting is out of scope (§6): this crate hands a host the
//! trait objects and pure functions (`Dispatcher::run_turn`,
//! `ResponseMultiplexer::consume`, `sse_frame`) its endpoint handlers
//! would call, rather than owning a server itself.

pub use beacon_core;
#[cfg(feature = "auth")]
pub use beacon_auth;
#[cfg(feature = "queue")]
pub use beacon_queue;
#[cfg(feature = "turn")]
pub use beacon_routing;
#[cfg(feature = "storage-memory")]
pub use beacon_storage_memory;
#[cfg(feature = "stream")]
pub use beacon_stream;
#[cfg(feature = "turn")]
pub use beacon_turn;

#[cfg(feature = "stream")]
mod channel_adapter;
#[cfg(feature = "stream")]
pub use channel_adapter::{ChannelAdapter, InvokeResponseSlot};

mod collecting_adapter;
pub use collecting_adapter::CollectingAdapter;

#[cfg(all(feature = "queue", feature = "stream", feature = "turn"))]
mod turn_runner;
#[cfg(all(feature = "queue", feature = "stream", feature = "turn"))]
pub use turn_runner::DispatcherTurnRunner;

/// Happy-path imports for composing a beacon runtime.
pub mod prelude {
    pub use beacon_core::{
        Activity, ActivityType, Adapter, BeaconError, ChannelAccount, ChannelId, Conversation,
        DeliveryMode, InvokeResponse, JsonTurnState, ResourceResponse, Storage, StorageReader,
        StorageRecord, TurnContext, TurnState,
    };

    #[cfg(feature = "turn")]
    pub use beacon_routing::{selector_fn, ActivityMatcher, RouteHandler, RouteTable, TurnHook};

    #[cfg(feature = "turn")]
    pub use beacon_turn::{Dispatcher, DispatcherConfig, TurnOutcome};

    #[cfg(feature = "auth")]
    pub use beacon_auth::{
        AuthFlow, AuthorizationConfig, FlowOutcome, OAuthFlow, OboProvider, TokenResponse,
        TokenServiceClient, TokenStatus,
    };

    #[cfg(feature = "queue")]
    pub use beacon_queue::{BackgroundQueue, QueueConfig, QueueEntry, TurnRunner};

    #[cfg(feature = "stream")]
    pub use beacon_stream::{sse_frame, ResponseMultiplexer};

    #[cfg(feature = "storage-memory")]
    pub use beacon_storage_memory::MemoryStorage;

    pub use crate::CollectingAdapter;

    #[cfg(feature = "stream")]
    pub use crate::{ChannelAdapter, InvokeResponseSlot};

    #[cfg(all(feature = "queue", feature = "stream", feature = "turn"))]
    pub use crate::DispatcherTurnRunner;
}
