use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatSessionRow {
	pub thread_id: String,
	pub checkpoint: Option<Value>,
	pub message_count: i64,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessageRow {
	pub thread_id: String,
	pub seq: i64,
	pub role: String,
	pub content: String,
	pub payload: Option<Value>,
	pub created_at: OffsetDateTime,
}
