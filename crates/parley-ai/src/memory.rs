//! Conversation memory trimming
//!
//! Bounds a conversation to a fixed number of messages while always
//! preserving the system instruction and the recency of other turns.
//! Evicted messages are simply discarded; there is no summarization pass.

use crate::llm::Message;

/// Reduce `messages` to at most `limit` entries.
///
/// System messages are kept ahead of everything else; when the budget is
/// exceeded, the oldest non-system messages are dropped first. In the
/// degenerate case where system messages alone exceed the limit, only the
/// most recent `limit` of them survive.
///
/// Pure and idempotent: `trim(&trim(m, n), n) == trim(m, n)`.
pub fn trim(messages: &[Message], limit: usize) -> Vec<Message> {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.is_system());

    if system.len() + rest.len() <= limit {
        return system.into_iter().chain(rest).cloned().collect();
    }

    if system.len() >= limit {
        // More system messages than budget: keep the most recent ones.
        return system[system.len() - limit..]
            .iter()
            .map(|m| (*m).clone())
            .collect();
    }

    let keep = limit - system.len();
    system
        .into_iter()
        .chain(rest[rest.len() - keep..].iter().copied())
        .cloned()
        .collect()
}
