//! The error taxonomy shared by every beacon crate.

use thiserror::Error;

/// Errors produced anywhere in the beacon runtime: activity validation,
/// storage, the turn dispatcher, and the sign-in flow machine all
/// surface through this one enum rather than a per-crate error type, so
/// a handler written against `beacon-turn` can propagate a
/// `beacon-auth` failure with `?` unchanged. One variant per error kind
/// in the error-handling design, each carrying the context needed to
/// act on it programmatically rather than just a message string.
///
/// `#[non_exhaustive]` so new failure modes can be added without a
/// breaking change.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BeaconError {
    /// An activity failed the §3.1 invariants (missing `type` or
    /// `conversation.id`). Dispatcher-level; the caller should see a
    /// 400.
    #[error("invalid activity: {reason}")]
    InvalidActivity {
        /// Why validation failed.
        reason: String,
    },

    /// A sign-in flow's `flow_expires` deadline passed before
    /// completion.
    #[error("sign-in flow timed out for conversation {conversation_id}")]
    Timeout {
        /// The conversation whose flow timed out.
        conversation_id: String,
    },

    /// The continue step of a sign-in flow signaled cancellation.
    #[error("sign-in was cancelled by the user")]
    UserCancelled,

    /// The token service returned 400 on a token-exchange request.
    #[error("token exchange requires user consent")]
    ConsentRequired,

    /// `continue_count` reached `invalid_sign_in_retry_max`.
    #[error("invalid sign-in input ({continue_count} of {max} allowed attempts)")]
    InvalidSignIn {
        /// How many invalid continue attempts have been made.
        continue_count: u32,
        /// The configured maximum before the flow errors out.
        max: u32,
    },

    /// The user token's `aud` claim does not begin with `api://`, so
    /// it cannot be exchanged on-behalf-of.
    #[error("token is not exchangeable: aud claim does not start with api://")]
    OboNotExchangeable,

    /// The named connection does not implement the OBO capability.
    #[error("connection {connection} does not support on-behalf-of exchange")]
    OboNotSupported {
        /// The connection name that was looked up.
        connection: String,
    },

    /// The OBO provider failed to exchange the token. The user is
    /// signed out as a result.
    #[error("on-behalf-of exchange failed")]
    OboExchangeFailed {
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The dedupe sentinel write collided with an in-flight exchange
    /// for the same flow-state key. Not raised to the handler — the
    /// flow machine maps this to a `null` `sign_in` result (§4.4.4).
    #[error("duplicate token-exchange request for the same flow state")]
    DuplicateExchange,

    /// The background queue is at capacity (§4.5); `enqueue` rejected
    /// rather than blocking.
    #[error("background queue is full (capacity {capacity})")]
    QueueFull {
        /// The queue's configured capacity.
        capacity: usize,
    },

    /// An optimistic-concurrency write's `expected_etag` did not match
    /// the stored record's current etag.
    #[error("etag mismatch writing {scope}/{key}")]
    EtagMismatch {
        /// The storage scope the write targeted.
        scope: String,
        /// The key within that scope.
        key: String,
    },

    /// Catch-all for sign-in flow failures that don't fit a more
    /// specific variant above.
    #[error("sign-in flow error: {reason}")]
    SignInError {
        /// What went wrong.
        reason: String,
    },

    /// `send`/`consume`/`complete`/`abort` was called for a
    /// `request_id` that `start` never registered, or that already
    /// finished (§4.6).
    #[error("no streaming response registered for request {request_id}")]
    UnknownStream {
        /// The `request_id` that had no matching channel.
        request_id: String,
    },

    /// A streaming response was explicitly aborted (§4.6, §9) after
    /// activities had already been flushed to the consumer.
    #[error("streaming response aborted: {reason}")]
    StreamAborted {
        /// Why the stream was aborted.
        reason: String,
    },

    /// Catch-all for errors that don't belong to the error taxonomy
    /// above — storage backend I/O, handler panics converted to
    /// errors, adapter delivery failures, and similar.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
