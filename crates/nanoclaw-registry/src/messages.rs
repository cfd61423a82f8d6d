use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use nanoclaw_types::InboundMessage;

use crate::db::RegistryResult;

/// Durable chat-message store consumed by the message loop. The bot ingress
/// appends; the loop only reads strictly past its watermark.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages in any of `chat_ids` strictly after `after`, ascending by
    /// timestamp.
    async fn fetch_since(
        &self,
        after: Option<DateTime<Utc>>,
        chat_ids: &[String],
    ) -> RegistryResult<Vec<InboundMessage>>;

    /// Messages in one chat strictly after `after`, ascending.
    async fn fetch_chat_since(
        &self,
        chat_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> RegistryResult<Vec<InboundMessage>>;

    async fn append(&self, message: &InboundMessage) -> RegistryResult<()>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMessageStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn fetch_since(
        &self,
        after: Option<DateTime<Utc>>,
        chat_ids: &[String],
    ) -> RegistryResult<Vec<InboundMessage>> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (2..2 + chat_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT chat_id, sender, content, timestamp FROM messages
             WHERE timestamp > ?1 AND chat_id IN ({placeholders})
             ORDER BY timestamp ASC"
        );
        let floor = after.map(|t| t.to_rfc3339()).unwrap_or_default();

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&floor];
        for chat_id in chat_ids {
            values.push(chat_id);
        }
        let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    async fn fetch_chat_since(
        &self,
        chat_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> RegistryResult<Vec<InboundMessage>> {
        let floor = after.map(|t| t.to_rfc3339()).unwrap_or_default();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT chat_id, sender, content, timestamp FROM messages
             WHERE chat_id = ?1 AND timestamp > ?2 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![chat_id, floor], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    async fn append(&self, message: &InboundMessage) -> RegistryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (chat_id, sender, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.chat_id,
                message.sender,
                message.content,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<InboundMessage> {
    let raw_ts: String = row.get(3)?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_ts)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(InboundMessage {
        chat_id: row.get(0)?,
        sender: row.get(1)?,
        content: row.get(2)?,
        timestamp,
    })
}
