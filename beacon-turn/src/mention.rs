//! Recipient-mention stripping (§4.2 step 3).

use regex::Regex;
use std::sync::OnceLock;

/// Strip a leading `@<recipient>` mention from `text`, if present.
///
/// When `recipient_name` is known, only a mention of that exact name
/// (case-insensitive) is stripped, followed by an optional `:`/`,` and
/// whitespace. Without a known recipient name, a generic leading
/// `@word` token is stripped instead — the best a channel-agnostic
/// dispatcher can do when it doesn't know its own display name.
pub fn strip_recipient_mention(text: &str, recipient_name: Option<&str>) -> String {
    let trimmed = text.trim_start();

    if let Some(name) = recipient_name.filter(|n| !n.is_empty()) {
        let pattern = format!(r"(?i)^@{}\b[:,]?\s*", regex::escape(name));
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(m) = re.find(trimmed) {
                return trimmed[m.end()..].to_string();
            }
        }
        return trimmed.to_string();
    }

    static GENERIC_MENTION: OnceLock<Regex> = OnceLock::new();
    let re = GENERIC_MENTION.get_or_init(|| Regex::new(r"^@\S+[:,]?\s*").unwrap());
    re.replace(trimmed, "").into_owned()
}
