//! `@handle message` triggers that summon a bot into a room.

use crate::agents::AgentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub agent: AgentId,
    /// Text after the handle, trimmed.
    pub body: String,
}

/// Parse a leading `@handle` followed by whitespace and a non-empty message.
///
/// Handles match case-insensitively. `@neo` alone, `@neohola` and mentions in
/// the middle of a line do not summon anyone.
pub fn parse_mention(text: &str) -> Option<Mention> {
    let rest = text.trim().strip_prefix('@')?;
    let split = rest.find(char::is_whitespace)?;
    let (handle, body) = rest.split_at(split);
    let agent = AgentId::from_handle(handle)?;
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    Some(Mention { agent, body: body.to_string() })
}
