//! Durable conversation history.
//!
//! Messages are append-only and ordered by a per-thread `seq`. Appends for one thread are
//! serialized with a transaction-scoped advisory lock keyed on the thread id, so concurrent
//! writers on the same thread never observe the same `seq`.

use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;

use crate::{
	Error, Result,
	models::{ChatMessageRow, ChatSessionRow},
};

pub struct NewMessage<'a> {
	pub role: &'a str,
	pub content: &'a str,
	pub payload: Option<&'a Value>,
	pub created_at: OffsetDateTime,
}

/// Appends one message and returns its sequence number. Creates the session row on first use.
pub async fn append_message(pool: &PgPool, thread_id: &str, message: NewMessage<'_>) -> Result<i64> {
	if thread_id.trim().is_empty() {
		return Err(Error::InvalidArgument("thread_id must be non-empty.".to_string()));
	}

	let mut tx = pool.begin().await?;

	sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
		.bind(thread_id)
		.execute(&mut *tx)
		.await?;

	upsert_session(&mut *tx, thread_id, message.created_at).await?;

	let seq: i64 = sqlx::query_scalar(
		"SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_messages WHERE thread_id = $1",
	)
	.bind(thread_id)
	.fetch_one(&mut *tx)
	.await?;

	sqlx::query(
		"\
INSERT INTO chat_messages (thread_id, seq, role, content, payload, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(thread_id)
	.bind(seq)
	.bind(message.role)
	.bind(message.content)
	.bind(message.payload)
	.bind(message.created_at)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"\
UPDATE chat_sessions
SET message_count = $2, updated_at = $3
WHERE thread_id = $1",
	)
	.bind(thread_id)
	.bind(seq)
	.bind(message.created_at)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(seq)
}

pub async fn save_checkpoint(
	pool: &PgPool,
	thread_id: &str,
	checkpoint: &Value,
	now: OffsetDateTime,
) -> Result<()> {
	let mut tx = pool.begin().await?;

	sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
		.bind(thread_id)
		.execute(&mut *tx)
		.await?;

	upsert_session(&mut *tx, thread_id, now).await?;

	sqlx::query(
		"\
UPDATE chat_sessions
SET checkpoint = $2, updated_at = $3
WHERE thread_id = $1",
	)
	.bind(thread_id)
	.bind(checkpoint)
	.bind(now)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

pub async fn load_session(
	executor: impl PgExecutor<'_>,
	thread_id: &str,
) -> Result<Option<ChatSessionRow>> {
	let row = sqlx::query_as::<_, ChatSessionRow>(
		"\
SELECT thread_id, checkpoint, message_count, created_at, updated_at
FROM chat_sessions
WHERE thread_id = $1",
	)
	.bind(thread_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn list_messages(
	executor: impl PgExecutor<'_>,
	thread_id: &str,
) -> Result<Vec<ChatMessageRow>> {
	let rows = sqlx::query_as::<_, ChatMessageRow>(
		"\
SELECT thread_id, seq, role, content, payload, created_at
FROM chat_messages
WHERE thread_id = $1
ORDER BY seq ASC",
	)
	.bind(thread_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

async fn upsert_session(
	executor: impl PgExecutor<'_>,
	thread_id: &str,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO chat_sessions (thread_id, checkpoint, message_count, created_at, updated_at)
VALUES ($1, NULL, 0, $2, $2)
ON CONFLICT (thread_id) DO NOTHING",
	)
	.bind(thread_id)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}
