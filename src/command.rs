//! Command codec for the RTPProxy control protocol.
//!
//! Builds the ASCII wire body of a control command and allocates the
//! correlation cookie that ties the eventual reply back to it. Pure code:
//! no I/O happens here, and cookie allocation is the only shared state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel tag used for the callee leg of a call.
///
/// The content does not matter to the server as long as the caller-leg
/// command references the same value, which is what links the two legs
/// into one proxied session.
pub const FROM_TAG: &str = "fromtag";

/// Sentinel tag used for the caller leg of a call.
pub const TO_TAG: &str = "totag";

/// Kind of control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create or update one leg of a media forwarding session (`U`).
    Update,
    /// Tear down a session and release its server-side resources (`D`).
    Destroy,
}

impl Operation {
    /// Protocol verb for this operation.
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Update => "U",
            Operation::Destroy => "D",
        }
    }
}

/// A single outbound control command, immutable once built.
#[derive(Debug, Clone)]
pub struct Command {
    /// Correlation cookie, unique among outstanding commands on this client.
    pub cookie: String,
    pub operation: Operation,
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: Option<String>,
}

impl Command {
    /// Builds a session-update command.
    pub fn update(
        cookies: &CookieGenerator,
        call_id: &str,
        from_tag: &str,
        to_tag: Option<&str>,
    ) -> Self {
        Command {
            cookie: cookies.next_cookie(),
            operation: Operation::Update,
            call_id: call_id.to_string(),
            from_tag: from_tag.to_string(),
            to_tag: to_tag.map(str::to_string),
        }
    }

    /// Builds a session-destroy command.
    pub fn destroy(
        cookies: &CookieGenerator,
        call_id: &str,
        from_tag: &str,
        to_tag: Option<&str>,
    ) -> Self {
        Command {
            cookie: cookies.next_cookie(),
            operation: Operation::Destroy,
            call_id: call_id.to_string(),
            from_tag: from_tag.to_string(),
            to_tag: to_tag.map(str::to_string),
        }
    }

    /// Renders the wire body of this command, without the cookie prefix.
    ///
    /// Update: `U <callId> <mediaIp> <mediaPort> <fromTag> <toTag>`, where
    /// the media fields are `0` until real media info exists and an absent
    /// `toTag` is rendered as `0` (callee-leg-only command).
    ///
    /// Destroy: `D <callId> <fromTag> <toTag>`.
    pub fn wire_message(&self) -> String {
        match self.operation {
            Operation::Update => format!(
                "U {} 0 0 {} {}",
                self.call_id,
                self.from_tag,
                self.to_tag.as_deref().unwrap_or("0"),
            ),
            Operation::Destroy => match self.to_tag.as_deref() {
                Some(to_tag) => format!("D {} {} {}", self.call_id, self.from_tag, to_tag),
                None => format!("D {} {}", self.call_id, self.from_tag),
            },
        }
    }
}

/// Allocates correlation cookies.
///
/// A random starting point plus an atomic increment keeps cookies unique
/// within a client instance without any coordination with the pending
/// table; the table still rejects duplicates defensively.
#[derive(Debug)]
pub struct CookieGenerator {
    next: AtomicU64,
}

impl CookieGenerator {
    pub fn new() -> Self {
        CookieGenerator {
            next: AtomicU64::new(u64::from(rand::random::<u32>())),
        }
    }

    /// Returns a fresh cookie, rendered as a short hex string.
    pub fn next_cookie(&self) -> String {
        format!("{:x}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CookieGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_update_wire_message_callee_leg() {
        let cookies = CookieGenerator::new();
        let command = Command::update(&cookies, "X", FROM_TAG, None);
        assert_eq!(command.wire_message(), "U X 0 0 fromtag 0");
    }

    #[test]
    fn test_update_wire_message_caller_leg() {
        let cookies = CookieGenerator::new();
        let command = Command::update(&cookies, "X", TO_TAG, Some(FROM_TAG));
        assert_eq!(command.wire_message(), "U X 0 0 totag fromtag");
    }

    #[test]
    fn test_destroy_wire_message() {
        let cookies = CookieGenerator::new();
        let command = Command::destroy(&cookies, "X", TO_TAG, Some(FROM_TAG));
        assert_eq!(command.wire_message(), "D X totag fromtag");

        // Single-tag form deletes the whole call.
        let command = Command::destroy(&cookies, "X", TO_TAG, None);
        assert_eq!(command.wire_message(), "D X totag");
    }

    #[test]
    fn test_cookies_are_unique() {
        let cookies = CookieGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let cookie = cookies.next_cookie();
            assert!(!cookie.is_empty());
            assert!(seen.insert(cookie), "cookie reused");
        }
    }
}
