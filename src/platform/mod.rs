pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Kind of chat an event arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    /// Any multi-member chat (Telegram groups and supergroups)
    Group,
    Other,
}

/// What a mention entity points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionTarget {
    /// `@username` mention; the covered text carries the name
    Username,
    /// Mention of a user without a public username
    User(u64),
}

/// A mention entity inside the message text.
/// Offsets are UTF-16 code units, as the platform reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionSpan {
    pub offset: usize,
    pub length: usize,
    pub target: MentionTarget,
}

impl MentionSpan {
    /// Slice of `text` this span covers, or `None` if the span runs past the end
    pub fn covered_text(&self, text: &str) -> Option<String> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        let slice = units.get(self.offset..end)?;
        Some(String::from_utf16_lossy(slice))
    }
}

/// A text message received from the chat platform, new or edited
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub sender_id: u64,
    pub sender_is_bot: bool,
    pub text: String,
    pub mention_spans: Vec<MentionSpan>,
    pub replied_to_sender_id: Option<u64>,
}

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Best-effort "typing..." indicator
    async fn send_typing(&self, _chat_id: i64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covered_text_ascii() {
        let span = MentionSpan {
            offset: 0,
            length: 8,
            target: MentionTarget::Username,
        };
        assert_eq!(span.covered_text("@botname help").as_deref(), Some("@botname"));
    }

    #[test]
    fn test_covered_text_counts_utf16_units() {
        // the dog emoji is a surrogate pair: two UTF-16 units
        let text = "🐶 @Woof hi";
        let span = MentionSpan {
            offset: 3,
            length: 5,
            target: MentionTarget::Username,
        };
        assert_eq!(span.covered_text(text).as_deref(), Some("@Woof"));
    }

    #[test]
    fn test_covered_text_out_of_range() {
        let span = MentionSpan {
            offset: 4,
            length: 10,
            target: MentionTarget::Username,
        };
        assert_eq!(span.covered_text("short"), None);
    }
}
