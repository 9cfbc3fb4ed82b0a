//! The activity envelope — the inbound/outbound unit of conversation.

use crate::channel::ChannelId;
use crate::error::BeaconError;
use serde::{Deserialize, Serialize};

/// What kind of activity this is.
///
/// `#[non_exhaustive]` with a `Custom` escape hatch: a channel-specific
/// activity type the dispatcher doesn't need to understand goes through
/// `Custom` rather than forcing a breaking change to this enum.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    /// A user or bot message.
    Message,
    /// Conversation membership changed (members added/removed).
    ConversationUpdate,
    /// A synchronous request expecting an `InvokeResponse`.
    Invoke,
    /// The response to a prior invoke.
    InvokeResponse,
    /// A channel-specific event.
    Event,
    /// A typing indicator.
    Typing,
    /// The conversation ended.
    EndOfConversation,
    /// Conversation handed off to another agent.
    Handoff,
    /// Future activity types.
    Custom(String),
}

/// How the outbound side of a turn should be delivered.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// One request, one (or zero) response — the common case.
    Normal,
    /// Caller expects a batch of activities back in the response body.
    ExpectReplies,
    /// Caller holds the HTTP response open; activities stream as
    /// produced (§4.6).
    Stream,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Normal
    }
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// The conversation's unique id. Required by Invariant A1.
    pub id: String,
    /// Tenant the conversation belongs to, if the channel is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl Conversation {
    /// Build a conversation reference from just an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: None,
        }
    }
}

/// A party to a conversation — the sender or recipient of an activity,
/// or an entry in `members_added`/`members_removed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    /// Channel-specific account id.
    pub id: String,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Azure AD object id, used as part of the Teams SSO cache key
    /// (§4.4.6). `None` off the Teams channel family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_object_id: Option<String>,
}

/// The activity envelope. Inbound activities arrive through the
/// dispatcher; outbound activities are produced by handlers and sent
/// through the [`crate::adapter::Adapter`] contract.
///
/// All list-valued fields default to empty vectors (never absent/null)
/// per §3.1 and §6.1 — `#[serde(default)]` on each guarantees that
/// deserializing an activity missing these fields still round-trips as
/// an empty `Vec`, not a missing field.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// The activity's type. Required by Invariant A1.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Channel-assigned id for this specific activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Correlates activities within one streaming request (§3.1, §4.6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Which channel this activity arrived on or is destined for.
    pub channel_id: ChannelId,
    /// The conversation this activity belongs to. Required by Invariant A1.
    pub conversation: Conversation,
    /// Who sent this activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    /// Who this activity is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    /// Plain text content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Arbitrary payload. Must round-trip strings, numbers, booleans,
    /// arrays, and nested objects unchanged — `serde_json::Value` is
    /// used rather than a hand-rolled variant enum specifically so the
    /// JSON value kind survives round-tripping without collapsing
    /// numbers to strings or similar.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
    /// Channel-specific side-channel payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub channel_data: serde_json::Value,
    /// The invoke name, when `activity_type` is `Invoke`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// How the response to this activity should be delivered.
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    /// Attachments (channel-specific shape, passed through opaquely).
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    /// Entities (channel-specific shape, passed through opaquely).
    #[serde(default)]
    pub entities: Vec<serde_json::Value>,
    /// Members added to the conversation (for `conversation-update`).
    #[serde(default)]
    pub members_added: Vec<ChannelAccount>,
    /// Members removed from the conversation (for `conversation-update`).
    #[serde(default)]
    pub members_removed: Vec<ChannelAccount>,
    /// Reactions added to a prior activity.
    #[serde(default)]
    pub reactions_added: Vec<serde_json::Value>,
    /// Reactions removed from a prior activity.
    #[serde(default)]
    pub reactions_removed: Vec<serde_json::Value>,
}

impl Activity {
    /// Build the minimal valid activity — a message with a conversation id.
    pub fn message(conversation_id: impl Into<String>, channel_id: impl Into<ChannelId>) -> Self {
        Self {
            activity_type: ActivityType::Message,
            id: None,
            request_id: None,
            channel_id: channel_id.into(),
            conversation: Conversation::new(conversation_id),
            from: None,
            recipient: None,
            text: None,
            value: serde_json::Value::Null,
            channel_data: serde_json::Value::Null,
            name: None,
            delivery_mode: DeliveryMode::Normal,
            attachments: Vec::new(),
            entities: Vec::new(),
            members_added: Vec::new(),
            members_removed: Vec::new(),
            reactions_added: Vec::new(),
            reactions_removed: Vec::new(),
        }
    }

    /// Set the text field (builder style).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// `true` if `activity_type` is `Invoke`.
    pub fn is_invoke(&self) -> bool {
        self.activity_type == ActivityType::Invoke
    }

    /// `true` if `activity_type` is `Message`.
    pub fn is_message(&self) -> bool {
        self.activity_type == ActivityType::Message
    }

    /// Enforce Invariant A1: `type` (always present, it's not an
    /// `Option`) and `conversation.id` must be non-empty.
    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.conversation.id.is_empty() {
            return Err(BeaconError::InvalidActivity {
                reason: "conversation.id is empty".into(),
            });
        }
        Ok(())
    }

    /// Build an outbound activity that inherits `conversation`,
    /// `channel_id`, and `request_id` from this (inbound) activity,
    /// per Invariant A2. The caller may still override any field.
    pub fn reply(&self, activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            id: None,
            request_id: self.request_id.clone(),
            channel_id: self.channel_id.clone(),
            conversation: self.conversation.clone(),
            from: self.recipient.clone(),
            recipient: self.from.clone(),
            text: None,
            value: serde_json::Value::Null,
            channel_data: serde_json::Value::Null,
            name: None,
            delivery_mode: self.delivery_mode,
            attachments: Vec::new(),
            entities: Vec::new(),
            members_added: Vec::new(),
            members_removed: Vec::new(),
            reactions_added: Vec::new(),
            reactions_removed: Vec::new(),
        }
    }
}
