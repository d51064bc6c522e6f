//! The conversational turn loop.
//!
//! One turn walks `AwaitingInput -> Deciding -> (ToolCall <-> ToolResult) -> Responding ->
//! AwaitingInput`. Every durable step is appended to the session store and followed by a
//! checkpoint, so a crashed turn can be repaired when the thread is next used. Turns on the same
//! thread id are serialized. Turns on different thread ids share nothing mutable.

pub mod policy;
pub mod state;

use std::{
	collections::HashMap,
	pin::Pin,
	sync::{Arc, Mutex, PoisonError, Weak},
	time::Instant,
};

use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use docent_config::Config;
use docent_providers::chat::{ChatEvent, ChatMessage, ToolCallRequest, ToolSpec};

use crate::{
	ChatProvider, Error, Result,
	retrieval::{ConversationContext, FAILURE_SENTINEL, RetrievalTool, ToolResult, ToolResultKind},
	session::{Checkpoint, Message, NewMessage, SessionStore},
	text_digest,
};
use policy::{DEFAULT_SYSTEM_POLICY, Decision};
use state::{Step, TurnState};

const EVENT_BUFFER: usize = 64;

pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send>>;

#[derive(Debug, Clone)]
pub struct ChatRequest {
	pub thread_id: String,
	pub input: String,
	pub context: ConversationContext,
}
impl ChatRequest {
	pub fn new(
		thread_id: impl Into<String>,
		input: impl Into<String>,
		context: ConversationContext,
	) -> Self {
		Self { thread_id: thread_id.into(), input: input.into(), context }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
	pub thread_id: String,
	pub answer: String,
}

/// Progress of one turn as seen by a streaming caller. `Done` or `Error` is always last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
	ToolCall { id: String, name: String, query: String },
	ToolResult { id: String, name: String, kind: ToolResultKind, content: String },
	Delta { text: String },
	Done { thread_id: String, answer: String },
	Error { message: String },
}
impl TurnEvent {
	pub fn name(&self) -> &'static str {
		match self {
			Self::ToolCall { .. } => "tool_call",
			Self::ToolResult { .. } => "tool_result",
			Self::Delta { .. } => "delta",
			Self::Done { .. } => "done",
			Self::Error { .. } => "error",
		}
	}
}

#[derive(Clone)]
pub struct Orchestrator {
	cfg: Arc<Config>,
	chat: Arc<dyn ChatProvider>,
	tool: Arc<RetrievalTool>,
	sessions: Arc<dyn SessionStore>,
	locks: Arc<ThreadLocks>,
	system_prompt: Arc<str>,
}
impl Orchestrator {
	pub fn new(
		cfg: Arc<Config>,
		chat: Arc<dyn ChatProvider>,
		tool: Arc<RetrievalTool>,
		sessions: Arc<dyn SessionStore>,
	) -> Self {
		let system_prompt: Arc<str> =
			cfg.agent.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_POLICY).into();

		Self { cfg, chat, tool, sessions, locks: Arc::new(ThreadLocks::default()), system_prompt }
	}

	/// Runs one turn to completion and returns the final answer.
	pub async fn chat(&self, req: ChatRequest) -> Result<ChatReply> {
		validate(&req)?;

		match self.run_turn(&req, &Sink::Discard).await? {
			TurnOutcome::Answered(answer) => Ok(ChatReply { thread_id: req.thread_id, answer }),
			TurnOutcome::Disconnected => Err(Error::InvalidState {
				message: "Turn ended without an answer.".to_string(),
			}),
		}
	}

	/// Opens one turn and returns its events while the rest runs in the background.
	///
	/// The session is loaded and the user message recorded before this returns, so a store
	/// failure surfaces here as an error rather than as an in-band event. Dropping the stream
	/// stops the turn at its next suspension point. Anything already recorded stays recorded.
	pub async fn chat_stream(&self, req: ChatRequest) -> Result<TurnStream> {
		validate(&req)?;

		let lock = self.locks.handle(&req.thread_id);
		let guard = lock.lock_owned().await;
		let started = Instant::now();
		let mut turn = Turn::default();

		if let Err(err) = self.begin(&req, &mut turn).await {
			self.fail(&req, &mut turn, &err).await;

			return Err(err);
		}

		let (tx, rx) = mpsc::channel(EVENT_BUFFER);
		let this = self.clone();

		tokio::spawn(async move {
			let _guard = guard;
			let sink = Sink::Channel(tx);
			let result = this.converse(&req, &sink, &mut turn).await;

			if let Err(err) = this.settle(&req, &mut turn, started, result).await {
				sink.emit(TurnEvent::Error { message: err.to_string() }).await;
			}
		});

		Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
			rx.recv().await.map(|event| (event, rx))
		})))
	}

	async fn run_turn(&self, req: &ChatRequest, sink: &Sink) -> Result<TurnOutcome> {
		let lock = self.locks.handle(&req.thread_id);
		let _guard = lock.lock_owned().await;
		let started = Instant::now();
		let mut turn = Turn::default();
		let result = match self.begin(req, &mut turn).await {
			Ok(()) => self.converse(req, sink, &mut turn).await,
			Err(err) => Err(err),
		};

		self.settle(req, &mut turn, started, result).await
	}

	async fn settle(
		&self,
		req: &ChatRequest,
		turn: &mut Turn,
		started: Instant,
		result: Result<TurnOutcome>,
	) -> Result<TurnOutcome> {
		match &result {
			Ok(outcome) => tracing::info!(
				thread_id = %req.thread_id,
				rounds = turn.rounds,
				disconnected = matches!(outcome, TurnOutcome::Disconnected),
				elapsed_ms = started.elapsed().as_millis() as u64,
				"Turn finished."
			),
			Err(err) => self.fail(req, turn, err).await,
		}

		result
	}

	/// Returns the thread to `AwaitingInput` when the turn failed midway.
	async fn fail(&self, req: &ChatRequest, turn: &mut Turn, err: &Error) {
		tracing::error!(thread_id = %req.thread_id, error = %err, "Turn failed.");

		if turn.state != TurnState::AwaitingInput
			&& let Err(checkpoint_err) = self.abort(&req.thread_id, turn).await
		{
			tracing::warn!(
				thread_id = %req.thread_id,
				error = %checkpoint_err,
				"Failed to checkpoint an aborted turn."
			);
		}
	}

	/// Loads the thread, repairs unanswered calls, and records the user message.
	async fn begin(&self, req: &ChatRequest, turn: &mut Turn) -> Result<()> {
		let thread_id = req.thread_id.as_str();

		if let Some(session) = self.sessions.load(thread_id).await? {
			let pending = policy::unanswered_calls(&session.messages, session.checkpoint.as_ref());

			turn.history = session.messages;

			for call in pending {
				tracing::warn!(
					thread_id,
					tool_call_id = %call.id,
					"Recording a failure for a tool call left unanswered by an earlier turn."
				);

				let message = self
					.sessions
					.append(thread_id, NewMessage::tool(&call.id, &call.name, FAILURE_SENTINEL))
					.await?;

				turn.history.push(message);
			}
		}

		let message = self.sessions.append(thread_id, NewMessage::user(req.input.as_str())).await?;

		turn.history.push(message);
		turn.advance(Step::Input)?;

		self.checkpoint(thread_id, turn, Vec::new()).await
	}

	async fn converse(&self, req: &ChatRequest, sink: &Sink, turn: &mut Turn) -> Result<TurnOutcome> {
		let thread_id = req.thread_id.as_str();
		let tools = [RetrievalTool::spec()];

		loop {
			let offer_tools = turn.rounds < self.cfg.agent.max_tool_rounds;
			let offered: &[ToolSpec] = if offer_tools { &tools } else { &[] };
			let step = self.model_step(&turn.history, offered, sink).await?;

			if step.disconnected {
				if !step.text.is_empty() {
					let message =
						self.sessions.append(thread_id, NewMessage::interrupted(step.text)).await?;

					turn.history.push(message);
				}

				self.abort(thread_id, turn).await?;

				return Ok(TurnOutcome::Disconnected);
			}
			if !offer_tools && !step.calls.is_empty() {
				tracing::warn!(
					thread_id,
					max_tool_rounds = self.cfg.agent.max_tool_rounds,
					"Ignoring tool calls requested after the round limit."
				);
			}

			match step.decision(offer_tools) {
				Decision::Respond(answer) => {
					turn.advance(Step::Respond)?;

					let message =
						self.sessions.append(thread_id, NewMessage::assistant(answer.as_str())).await?;

					turn.history.push(message);
					turn.advance(Step::Finished)?;
					self.checkpoint(thread_id, turn, Vec::new()).await?;
					sink.emit(TurnEvent::Done { thread_id: thread_id.to_string(), answer: answer.clone() })
						.await;

					return Ok(TurnOutcome::Answered(answer));
				},
				Decision::CallTool(calls) => {
					turn.advance(Step::CallTool)?;

					let message = self
						.sessions
						.append(thread_id, NewMessage::assistant_tool_calls(step.text, calls.clone()))
						.await?;

					turn.history.push(message);
					self.checkpoint(thread_id, turn, calls.clone()).await?;

					if !self.run_tool_calls(req, &calls, sink, turn).await? {
						self.abort(thread_id, turn).await?;

						return Ok(TurnOutcome::Disconnected);
					}

					turn.advance(Step::ResultsRecorded)?;
					self.checkpoint(thread_id, turn, Vec::new()).await?;

					turn.rounds += 1;
				},
			}
		}
	}

	/// Executes one round of tool calls. Returns `false` when the client went away.
	async fn run_tool_calls(
		&self,
		req: &ChatRequest,
		calls: &[ToolCallRequest],
		sink: &Sink,
		turn: &mut Turn,
	) -> Result<bool> {
		let thread_id = req.thread_id.as_str();

		for (idx, call) in calls.iter().enumerate() {
			if idx > 0 {
				turn.advance(Step::CallTool)?;
			}

			let announced = sink
				.emit(TurnEvent::ToolCall {
					id: call.id.clone(),
					name: call.name.clone(),
					query: req.input.clone(),
				})
				.await;

			if !announced {
				return Ok(false);
			}

			let result = self.invoke_tool(req, call).await;
			let message = self
				.sessions
				.append(thread_id, NewMessage::tool(&call.id, &call.name, result.text.as_str()))
				.await?;

			turn.history.push(message);
			turn.advance(Step::ToolFinished)?;

			let delivered = sink
				.emit(TurnEvent::ToolResult {
					id: call.id.clone(),
					name: call.name.clone(),
					kind: result.kind,
					content: result.text,
				})
				.await;

			if !delivered {
				return Ok(false);
			}
		}

		Ok(true)
	}

	/// One adapter invocation, always with the turn's original query.
	async fn invoke_tool(&self, req: &ChatRequest, call: &ToolCallRequest) -> ToolResult {
		if !policy::is_known_tool(&call.name) {
			tracing::warn!(
				thread_id = %req.thread_id,
				tool_call_id = %call.id,
				tool_name = %call.name,
				"Model requested an unknown tool."
			);

			return ToolResult::failed();
		}

		let requested = policy::requested_query(call);

		if requested.as_deref() != Some(req.input.as_str()) {
			tracing::debug!(
				thread_id = %req.thread_id,
				tool_call_id = %call.id,
				requested_digest = %requested.as_deref().map(text_digest).unwrap_or_default(),
				original_digest = %text_digest(&req.input),
				"Tool arguments differ from the original query. Using the original query."
			);
		}

		self.tool.search(&req.input, &req.context).await
	}

	async fn model_step(
		&self,
		history: &[Message],
		tools: &[ToolSpec],
		sink: &Sink,
	) -> Result<ModelStep> {
		let mut messages = vec![ChatMessage::system(self.system_prompt.as_ref())];

		messages.extend(policy::history_window(history, self.cfg.agent.history_limit as usize));

		let mut events = self.chat.stream(&self.cfg.providers.agent, &messages, tools).await?;
		let mut step = ModelStep::default();

		while let Some(event) = events.next().await {
			match event? {
				ChatEvent::Text(fragment) => {
					step.text.push_str(&fragment);

					if !sink.emit(TurnEvent::Delta { text: fragment }).await {
						step.disconnected = true;

						return Ok(step);
					}
				},
				ChatEvent::ToolCalls(calls) => step.calls.extend(calls),
			}
		}

		Ok(step)
	}

	async fn checkpoint(
		&self,
		thread_id: &str,
		turn: &Turn,
		pending: Vec<ToolCallRequest>,
	) -> Result<()> {
		let checkpoint =
			Checkpoint::new(turn.state, turn.history.len() as u64).with_pending(pending);

		self.sessions.checkpoint(thread_id, checkpoint).await
	}

	/// Returns the thread to `AwaitingInput`, keeping unanswered calls for the next turn to repair.
	async fn abort(&self, thread_id: &str, turn: &mut Turn) -> Result<()> {
		let pending = policy::unanswered_calls(&turn.history, None);

		turn.advance(Step::Abort)?;

		self.checkpoint(thread_id, turn, pending).await
	}
}

enum TurnOutcome {
	Answered(String),
	Disconnected,
}

struct Turn {
	state: TurnState,
	history: Vec<Message>,
	rounds: u32,
}
impl Default for Turn {
	fn default() -> Self {
		Self { state: TurnState::AwaitingInput, history: Vec::new(), rounds: 0 }
	}
}
impl Turn {
	fn advance(&mut self, step: Step) -> Result<()> {
		self.state = self.state.next(step)?;

		Ok(())
	}
}

#[derive(Default)]
struct ModelStep {
	text: String,
	calls: Vec<ToolCallRequest>,
	disconnected: bool,
}
impl ModelStep {
	fn decision(&self, tools_offered: bool) -> Decision {
		if tools_offered && !self.calls.is_empty() {
			Decision::CallTool(self.calls.clone())
		} else {
			Decision::Respond(self.text.clone())
		}
	}
}

enum Sink {
	Channel(mpsc::Sender<TurnEvent>),
	Discard,
}
impl Sink {
	/// Returns `false` once the receiver is gone.
	async fn emit(&self, event: TurnEvent) -> bool {
		match self {
			Self::Channel(tx) => tx.send(event).await.is_ok(),
			Self::Discard => true,
		}
	}
}

/// One async mutex per live thread id. Entries disappear once no turn holds them.
#[derive(Default)]
struct ThreadLocks {
	inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}
impl ThreadLocks {
	fn handle(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
		let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

		if let Some(lock) = locks.get(thread_id).and_then(Weak::upgrade) {
			return lock;
		}

		locks.retain(|_, lock| lock.strong_count() > 0);

		let lock = Arc::new(AsyncMutex::new(()));

		locks.insert(thread_id.to_string(), Arc::downgrade(&lock));

		lock
	}
}

fn validate(req: &ChatRequest) -> Result<()> {
	if req.thread_id.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "thread_id must be non-empty.".to_string() });
	}
	if req.input.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "input must be non-empty.".to_string() });
	}

	Ok(())
}
