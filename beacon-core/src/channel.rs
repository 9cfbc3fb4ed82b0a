//! Channel identity — the `<channel>[:<sub-channel>]` composite string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the channel an activity arrived on or is destined for.
///
/// A channel id is a composite string `<channel>[:<sub-channel>]`.
/// Equality on the bare `channel` part matches any sub-channel; equality
/// on the full string matches exactly. See [`ChannelId::matches`] and
/// the `PartialEq` impl below for the two comparison modes.
///
/// Deliberately not built from the `typed_id!` macro pattern used
/// elsewhere for opaque ids — a `ChannelId` needs the bare/full matching
/// split, which a derived structural `PartialEq` cannot express.
#[derive(Debug, Clone, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Build a channel id from its wire string (e.g. `"msteams"`,
    /// `"msteams:COPILOT"`).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full wire string, unchanged.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare channel, with any `:sub-channel` suffix stripped.
    pub fn channel(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// The sub-channel, if present.
    pub fn sub_channel(&self) -> Option<&str> {
        self.0.splitn(2, ':').nth(1)
    }

    /// True if `self` and `other` refer to the same bare channel,
    /// ignoring sub-channel. Use this for "any msteams surface" checks
    /// (e.g. the Teams-family timeout gate in §4.4.2).
    pub fn matches(&self, other: &ChannelId) -> bool {
        self.channel() == other.channel()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Full-string equality — `msteams` != `msteams:COPILOT`. Use
/// [`ChannelId::matches`] for bare-channel equality.
impl PartialEq for ChannelId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_channel_extraction() {
        assert_eq!(ChannelId::new("msteams").channel(), "msteams");
        assert_eq!(ChannelId::new("msteams:COPILOT").channel(), "msteams");
        assert_eq!(ChannelId::new("directline").channel(), "directline");
    }

    #[test]
    fn sub_channel_extraction() {
        assert_eq!(ChannelId::new("msteams:COPILOT").sub_channel(), Some("COPILOT"));
        assert_eq!(ChannelId::new("msteams").sub_channel(), None);
    }

    #[test]
    fn full_equality_is_exact() {
        let a = ChannelId::new("msteams");
        let b = ChannelId::new("msteams:COPILOT");
        assert_ne!(a, b);
        assert_eq!(a, ChannelId::new("msteams"));
    }

    #[test]
    fn bare_matches_is_loose() {
        let a = ChannelId::new("msteams");
        let b = ChannelId::new("msteams:COPILOT");
        assert!(a.matches(&b));
        assert!(b.matches(&a));
    }

    #[test]
    fn display_roundtrips_the_wire_string() {
        let id = ChannelId::new("mcp");
        assert_eq!(id.to_string(), "mcp");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ChannelId::new("msteams:COPILOT");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"msteams:COPILOT\"");
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
