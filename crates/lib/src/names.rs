//! Topic/service name and message type mapping to the gateway's wire form.
//!
//! Host-side names may carry a leading prefix (`/foo`, `~/foo`); the gateway
//! expects the bare identifier. Host-side types carry a kind qualifier
//! (`std_msgs/msg/String`); the gateway expects `package/Type`.

/// True for the characters of a regex `\w` (ASCII letters, digits, underscore).
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Strip everything before the first word character.
///
/// A name without any word character maps to the empty string.
pub fn normalize_name(name: &str) -> &str {
    match name.find(is_word_char) {
        Some(idx) => &name[idx..],
        None => "",
    }
}

/// Collapse a slash-delimited type descriptor to `{first}/{last}`, dropping interior segments.
pub fn normalize_type(type_name: &str) -> String {
    let mut parts = type_name.split('/');
    let first = parts.next().unwrap_or_default();
    let last = parts.next_back().unwrap_or(first);
    format!("{}/{}", first, last)
}
