//! Conversation history per thread id, plus the orchestrator checkpoint.

use std::{
	collections::HashMap,
	sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use docent_providers::chat::ToolCallRequest;
use docent_storage::{
	models::{ChatMessageRow, ChatSessionRow},
	sessions,
};

use crate::{BoxFuture, Error, Result, orchestrator::state::TurnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
	User,
	Assistant,
	Tool,
}
impl MessageRole {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::User => "user",
			Self::Assistant => "assistant",
			Self::Tool => "tool",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"user" => Ok(Self::User),
			"assistant" => Ok(Self::Assistant),
			"tool" => Ok(Self::Tool),
			other => Err(Error::Session { message: format!("Unknown message role {other:?}.") }),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
	/// Calls requested by an assistant message.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tool_calls: Vec<ToolCallRequest>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_name: Option<String>,
	/// The client went away before the assistant finished.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub seq: u64,
	pub role: MessageRole,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<MessagePayload>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl Message {
	pub fn tool_calls(&self) -> &[ToolCallRequest] {
		self.payload.as_ref().map(|payload| payload.tool_calls.as_slice()).unwrap_or_default()
	}

	pub fn tool_call_id(&self) -> Option<&str> {
		self.payload.as_ref().and_then(|payload| payload.tool_call_id.as_deref())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
	pub role: MessageRole,
	pub content: String,
	pub payload: Option<MessagePayload>,
}
impl NewMessage {
	pub fn user(content: impl Into<String>) -> Self {
		Self { role: MessageRole::User, content: content.into(), payload: None }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: MessageRole::Assistant, content: content.into(), payload: None }
	}

	pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
		Self {
			role: MessageRole::Assistant,
			content: content.into(),
			payload: Some(MessagePayload { tool_calls: calls, ..Default::default() }),
		}
	}

	pub fn interrupted(content: impl Into<String>) -> Self {
		Self {
			role: MessageRole::Assistant,
			content: content.into(),
			payload: Some(MessagePayload { interrupted: true, ..Default::default() }),
		}
	}

	pub fn tool(
		tool_call_id: impl Into<String>,
		tool_name: impl Into<String>,
		content: impl Into<String>,
	) -> Self {
		Self {
			role: MessageRole::Tool,
			content: content.into(),
			payload: Some(MessagePayload {
				tool_call_id: Some(tool_call_id.into()),
				tool_name: Some(tool_name.into()),
				..Default::default()
			}),
		}
	}
}

/// Where the orchestrator stood after its last durable step on a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
	pub state: TurnState,
	/// Tool calls requested by the model whose results may not have been recorded yet.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub pending_tool_calls: Vec<ToolCallRequest>,
	pub message_count: u64,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl Checkpoint {
	pub fn new(state: TurnState, message_count: u64) -> Self {
		Self {
			state,
			pending_tool_calls: Vec::new(),
			message_count,
			updated_at: OffsetDateTime::now_utc(),
		}
	}

	pub fn with_pending(mut self, calls: Vec<ToolCallRequest>) -> Self {
		self.pending_tool_calls = calls;

		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
	pub thread_id: String,
	pub messages: Vec<Message>,
	pub checkpoint: Option<Checkpoint>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// Durable, append-only history keyed by thread id.
///
/// Appends for one thread are totally ordered. A session comes into existence with its first
/// message or checkpoint.
pub trait SessionStore
where
	Self: Send + Sync,
{
	fn load<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>>;

	fn append<'a>(&'a self, thread_id: &'a str, message: NewMessage)
	-> BoxFuture<'a, Result<Message>>;

	fn checkpoint<'a>(
		&'a self,
		thread_id: &'a str,
		checkpoint: Checkpoint,
	) -> BoxFuture<'a, Result<()>>;
}

pub struct PgSessionStore {
	pool: PgPool,
}
impl PgSessionStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}
impl SessionStore for PgSessionStore {
	fn load<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
		Box::pin(async move {
			let Some(row) =
				sessions::load_session(&self.pool, thread_id).await.map_err(session_err)?
			else {
				return Ok(None);
			};
			let rows = sessions::list_messages(&self.pool, thread_id).await.map_err(session_err)?;
			let messages = rows.into_iter().map(message_from_row).collect::<Result<Vec<_>>>()?;

			Ok(Some(session_from_row(row, messages)?))
		})
	}

	fn append<'a>(
		&'a self,
		thread_id: &'a str,
		message: NewMessage,
	) -> BoxFuture<'a, Result<Message>> {
		Box::pin(async move {
			let created_at = OffsetDateTime::now_utc();
			let payload = message
				.payload
				.as_ref()
				.map(serde_json::to_value)
				.transpose()
				.map_err(|err| Error::Session { message: err.to_string() })?;
			let seq = sessions::append_message(
				&self.pool,
				thread_id,
				sessions::NewMessage {
					role: message.role.as_str(),
					content: &message.content,
					payload: payload.as_ref(),
					created_at,
				},
			)
			.await
			.map_err(session_err)?;

			Ok(Message {
				seq: seq as u64,
				role: message.role,
				content: message.content,
				payload: message.payload,
				created_at,
			})
		})
	}

	fn checkpoint<'a>(
		&'a self,
		thread_id: &'a str,
		checkpoint: Checkpoint,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let value = serde_json::to_value(&checkpoint)
				.map_err(|err| Error::Session { message: err.to_string() })?;

			sessions::save_checkpoint(&self.pool, thread_id, &value, checkpoint.updated_at)
				.await
				.map_err(session_err)
		})
	}
}

/// Process-local store for tests and single-node runs without Postgres.
#[derive(Default)]
pub struct MemorySessionStore {
	sessions: Mutex<HashMap<String, Session>>,
}
impl MemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_sessions<R>(&self, f: impl FnOnce(&mut HashMap<String, Session>) -> R) -> R {
		let mut guard = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

		f(&mut guard)
	}

	fn entry<'a>(sessions: &'a mut HashMap<String, Session>, thread_id: &str) -> &'a mut Session {
		sessions.entry(thread_id.to_string()).or_insert_with(|| Session {
			thread_id: thread_id.to_string(),
			messages: Vec::new(),
			checkpoint: None,
			created_at: OffsetDateTime::now_utc(),
		})
	}
}
impl SessionStore for MemorySessionStore {
	fn load<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
		Box::pin(async move { Ok(self.with_sessions(|sessions| sessions.get(thread_id).cloned())) })
	}

	fn append<'a>(
		&'a self,
		thread_id: &'a str,
		message: NewMessage,
	) -> BoxFuture<'a, Result<Message>> {
		Box::pin(async move {
			if thread_id.trim().is_empty() {
				return Err(Error::InvalidRequest { message: "thread_id must be non-empty.".to_string() });
			}

			Ok(self.with_sessions(|sessions| {
				let session = Self::entry(sessions, thread_id);
				let stored = Message {
					seq: session.messages.len() as u64 + 1,
					role: message.role,
					content: message.content,
					payload: message.payload,
					created_at: OffsetDateTime::now_utc(),
				};

				session.messages.push(stored.clone());

				stored
			}))
		})
	}

	fn checkpoint<'a>(
		&'a self,
		thread_id: &'a str,
		checkpoint: Checkpoint,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.with_sessions(|sessions| {
				Self::entry(sessions, thread_id).checkpoint = Some(checkpoint);
			});

			Ok(())
		})
	}
}

fn session_err(err: docent_storage::Error) -> Error {
	Error::Session { message: err.to_string() }
}

fn message_from_row(row: ChatMessageRow) -> Result<Message> {
	let payload = row
		.payload
		.map(serde_json::from_value::<MessagePayload>)
		.transpose()
		.map_err(|err| Error::Session { message: format!("Malformed message payload: {err}.") })?;

	Ok(Message {
		seq: row.seq as u64,
		role: MessageRole::parse(&row.role)?,
		content: row.content,
		payload,
		created_at: row.created_at,
	})
}

fn session_from_row(row: ChatSessionRow, messages: Vec<Message>) -> Result<Session> {
	let checkpoint = row
		.checkpoint
		.map(serde_json::from_value::<Checkpoint>)
		.transpose()
		.map_err(|err| Error::Session { message: format!("Malformed checkpoint: {err}.") })?;

	Ok(Session { thread_id: row.thread_id, messages, checkpoint, created_at: row.created_at })
}
