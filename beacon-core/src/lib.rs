//! # beacon-core — the activity model and storage contract
//!
//! This crate defines the wire-level shapes and cross-cutting
//! contracts every other `beacon-*` crate builds on: the [`Activity`]
//! envelope channels exchange, [`ChannelId`] composite-string identity,
//! the [`Storage`] trait conversation and sign-in state persist
//! through, the opaque-except-`temp.input` [`TurnState`] a turn reads
//! and writes, the [`InvokeResponse`] a handler returns for synchronous
//! invokes, and the single [`BeaconError`] taxonomy every crate's
//! fallible operations return.
//!
//! ## Design Principle
//!
//! Every type here is a data contract, not a mechanism. `Activity` is
//! "the envelope a channel and a bot agree on," not "a Teams REST
//! payload" — a test double, an in-memory adapter, and a real channel
//! connector all produce and consume the same `Activity`.
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for the `value` and
//! `channel_data` extension fields on [`Activity`]. This is an
//! intentional choice: channel payloads are JSON by convention across
//! every bot channel, and `serde_json::Value` preserves the original
//! JSON value kind (string vs. number vs. object) through a
//! deserialize/serialize round trip, which a typed enum would not do
//! without per-channel variants.

#![deny(missing_docs)]

pub mod activity;
pub mod adapter;
pub mod channel;
pub mod context;
pub mod error;
pub mod invoke;
pub mod state;
pub mod storage;

pub use activity::{Activity, ActivityType, ChannelAccount, Conversation, DeliveryMode};
pub use adapter::{Adapter, ResourceResponse};
pub use channel::ChannelId;
pub use context::TurnContext;
pub use error::BeaconError;
pub use invoke::InvokeResponse;
pub use state::{JsonTurnState, TurnState};
pub use storage::{Storage, StorageReader, StorageRecord};
