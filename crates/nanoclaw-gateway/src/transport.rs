use async_trait::async_trait;

/// Default chat transport message cap, matching common bot APIs.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// External chat egress. The gateway renders text; the transport owns the
/// wire format, including how approval buttons are attached.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()>;

    /// Send `text` with inline approve/deny buttons whose callback payloads
    /// are `approve:<id>` / `deny:<id>` / `reason:<id>`.
    async fn send_approval_prompt(
        &self,
        chat_id: &str,
        text: &str,
        proposal_id: &str,
    ) -> anyhow::Result<()>;

    fn max_message_len(&self) -> usize {
        DEFAULT_MAX_MESSAGE_LEN
    }
}

/// Split a long message into chunks within `max_len`, preferring newline
/// boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let chunk = &text[start..end];
        let split_at = if end < text.len() {
            chunk.rfind('\n').map(|p| p + 1).unwrap_or(chunk.len())
        } else {
            chunk.len()
        };
        chunks.push(text[start..start + split_at].to_string());
        start += split_at;
    }
    chunks
}
