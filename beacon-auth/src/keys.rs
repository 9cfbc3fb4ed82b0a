//! Flow-state storage key derivation (§4.3).

use beacon_core::ChannelId;

/// The storage key for the standard OAuth flow:
/// `"oauth/<auth_name>/<channel_id>/<conversation_id>/flowState"`.
pub fn oauth_flow_key(auth_name: &str, channel_id: &ChannelId, conversation_id: &str) -> String {
    format!("oauth/{auth_name}/{channel_id}/{conversation_id}/flowState")
}

/// The storage key for an SSO flow's per-request token-exchange
/// correlation:
/// `"teamssso/<auth_name>/<channel_id>/<conversation_id>/<exchange_id>/flowState"`.
pub fn sso_flow_key(
    auth_name: &str,
    channel_id: &ChannelId,
    conversation_id: &str,
    exchange_id: &str,
) -> String {
    format!("teamssso/{auth_name}/{channel_id}/{conversation_id}/{exchange_id}/flowState")
}

/// Generate a fresh exchange id of the form `<uuid>-<auth_name>`.
pub fn new_exchange_id(auth_name: &str) -> String {
    format!("{}-{auth_name}", uuid::Uuid::new_v4())
}

/// Split an exchange id of the form `<uuid>-<auth_name>` back into its
/// two parts. A UUID renders as 36 characters (`8-4-4-4-12` hex groups
/// joined by hyphens); the separator before `auth_name` is the 37th
/// byte.
pub fn parse_exchange_id(id: &str) -> Option<(&str, &str)> {
    const UUID_LEN: usize = 36;
    if id.len() <= UUID_LEN + 1 {
        return None;
    }
    let (uuid_part, rest) = id.split_at(UUID_LEN);
    let auth_name = rest.strip_prefix('-')?;
    uuid::Uuid::parse_str(uuid_part).ok()?;
    if auth_name.is_empty() {
        return None;
    }
    Some((uuid_part, auth_name))
}
