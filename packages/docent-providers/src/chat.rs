//! OpenAI-compatible chat completions, with tool calling, in blocking and streamed form.

use std::{
	collections::{BTreeMap, VecDeque},
	pin::Pin,
	sync::atomic::{AtomicU64, Ordering},
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

static FALLBACK_STEPS: AtomicU64 = AtomicU64::new(0);

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	System,
	User,
	Assistant,
	Tool,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::System => "system",
			Self::User => "user",
			Self::Assistant => "assistant",
			Self::Tool => "tool",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
	pub tool_calls: Vec<ToolCallRequest>,
	pub tool_call_id: Option<String>,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self::plain(Role::System, content)
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self::plain(Role::User, content)
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self::plain(Role::Assistant, content)
	}

	pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
		Self { role: Role::Assistant, content: content.into(), tool_calls: calls, tool_call_id: None }
	}

	pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			role: Role::Tool,
			content: content.into(),
			tool_calls: Vec::new(),
			tool_call_id: Some(tool_call_id.into()),
		}
	}

	fn plain(role: Role, content: impl Into<String>) -> Self {
		Self { role, content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
	}

	fn to_wire(&self) -> Value {
		match self.role {
			Role::Assistant if !self.tool_calls.is_empty() => {
				let calls: Vec<Value> = self
					.tool_calls
					.iter()
					.map(|call| {
						serde_json::json!({
							"id": call.id,
							"type": "function",
							"function": { "name": call.name, "arguments": call.arguments },
						})
					})
					.collect();
				let content =
					if self.content.is_empty() { Value::Null } else { Value::from(self.content.as_str()) };

				serde_json::json!({ "role": "assistant", "content": content, "tool_calls": calls })
			},
			Role::Tool => serde_json::json!({
				"role": "tool",
				"tool_call_id": self.tool_call_id.as_deref().unwrap_or_default(),
				"content": self.content,
			}),
			role => serde_json::json!({ "role": role.as_str(), "content": self.content }),
		}
	}
}

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
	pub name: String,
	pub description: String,
	pub parameters: Value,
}
impl ToolSpec {
	fn to_wire(&self) -> Value {
		serde_json::json!({
			"type": "function",
			"function": {
				"name": self.name,
				"description": self.description,
				"parameters": self.parameters,
			},
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
	pub id: String,
	pub name: String,
	/// Raw JSON text as produced by the model. May be malformed.
	pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
	pub content: String,
	pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
	Text(String),
	/// Emitted once the model has finished describing every call of the step.
	ToolCalls(Vec<ToolCallRequest>),
}

pub async fn complete(
	cfg: &docent_config::LlmProviderConfig,
	messages: &[ChatMessage],
	tools: &[ToolSpec],
) -> Result<ChatCompletion> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&request_body(cfg, messages, tools, false))
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion(json)
}

pub async fn stream(
	cfg: &docent_config::LlmProviderConfig,
	messages: &[ChatMessage],
	tools: &[ToolSpec],
) -> Result<ChatEventStream> {
	let idle = Duration::from_millis(cfg.timeout_ms);
	// The body may stream for longer than `timeout_ms`; only stalls count against it.
	let client = Client::builder().connect_timeout(idle).read_timeout(idle).build()?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&request_body(cfg, messages, tools, true))
		.send()
		.await?
		.error_for_status()?;

	Ok(decode_event_stream(stream_lines(res.bytes_stream())))
}

fn request_body(
	cfg: &docent_config::LlmProviderConfig,
	messages: &[ChatMessage],
	tools: &[ToolSpec],
	stream: bool,
) -> Value {
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
		"stream": stream,
	});

	if !tools.is_empty()
		&& let Some(map) = body.as_object_mut()
	{
		map.insert("tools".to_string(), tools.iter().map(ToolSpec::to_wire).collect());
		map.insert("tool_choice".to_string(), Value::from("auto"));
	}

	body
}

fn parse_completion(json: Value) -> Result<ChatCompletion> {
	let message = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.ok_or_else(|| Error::response("Chat response is missing choices[0].message."))?;
	let content = message.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
	let mut tool_calls = Vec::new();

	if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
		let step = fallback_step();

		for (position, call) in calls.iter().enumerate() {
			let function = call
				.get("function")
				.ok_or_else(|| Error::response("Tool call is missing function."))?;
			let name = function
				.get("name")
				.and_then(|v| v.as_str())
				.ok_or_else(|| Error::response("Tool call is missing function name."))?;
			let id = call
				.get("id")
				.and_then(|v| v.as_str())
				.map(ToString::to_string)
				.unwrap_or_else(|| format!("{step}_{position}"));
			let arguments =
				function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();

			tool_calls.push(ToolCallRequest { id, name: name.to_string(), arguments });
		}
	}

	Ok(ChatCompletion { content, tool_calls })
}

#[derive(Debug, Default)]
struct PartialCall {
	id: Option<String>,
	name: String,
	arguments: String,
}

/// Turns OpenAI SSE `data:` lines into [`ChatEvent`]s.
///
/// Tool call fragments are keyed by their `index` and flushed as one event when the choice
/// reports a finish reason, on `[DONE]`, or when the stream ends.
#[derive(Debug, Default)]
pub struct StreamDecoder {
	calls: BTreeMap<u64, PartialCall>,
	done: bool,
}
impl StreamDecoder {
	pub fn is_done(&self) -> bool {
		self.done
	}

	pub fn push_line(&mut self, line: &str) -> Result<Vec<ChatEvent>> {
		let line = line.trim();
		let Some(data) = line.strip_prefix("data:") else {
			return Ok(Vec::new());
		};
		let data = data.trim();

		if data.is_empty() {
			return Ok(Vec::new());
		}
		if data == "[DONE]" {
			self.done = true;

			return Ok(self.finish());
		}

		let chunk: Value = serde_json::from_str(data)?;
		let Some(choice) =
			chunk.get("choices").and_then(|v| v.as_array()).and_then(|arr| arr.first())
		else {
			return Ok(Vec::new());
		};
		let mut events = Vec::new();

		if let Some(delta) = choice.get("delta") {
			if let Some(text) = delta.get("content").and_then(|v| v.as_str())
				&& !text.is_empty()
			{
				events.push(ChatEvent::Text(text.to_string()));
			}
			if let Some(fragments) = delta.get("tool_calls").and_then(|v| v.as_array()) {
				for fragment in fragments {
					self.absorb(fragment);
				}
			}
		}
		if choice.get("finish_reason").and_then(|v| v.as_str()).is_some() {
			events.extend(self.finish());
		}

		Ok(events)
	}

	pub fn finish(&mut self) -> Vec<ChatEvent> {
		if self.calls.is_empty() {
			return Vec::new();
		}

		let step = fallback_step();
		let calls = std::mem::take(&mut self.calls)
			.into_iter()
			.map(|(index, call)| ToolCallRequest {
				id: call.id.unwrap_or_else(|| format!("{step}_{index}")),
				name: call.name,
				arguments: if call.arguments.trim().is_empty() {
					"{}".to_string()
				} else {
					call.arguments
				},
			})
			.collect();

		vec![ChatEvent::ToolCalls(calls)]
	}

	fn absorb(&mut self, fragment: &Value) {
		let index = fragment.get("index").and_then(|v| v.as_u64()).unwrap_or_default();
		let entry = self.calls.entry(index).or_default();

		if let Some(id) = fragment.get("id").and_then(|v| v.as_str())
			&& !id.is_empty()
		{
			entry.id = Some(id.to_string());
		}
		if let Some(function) = fragment.get("function") {
			if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
				entry.name.push_str(name);
			}
			if let Some(arguments) = function.get("arguments").and_then(|v| v.as_str()) {
				entry.arguments.push_str(arguments);
			}
		}
	}
}

/// Drives a [`StreamDecoder`] over a stream of SSE lines.
pub fn decode_event_stream(
	lines: impl Stream<Item = Result<String>> + Send + 'static,
) -> ChatEventStream {
	let state = (Box::pin(lines), StreamDecoder::default(), VecDeque::new(), false);
	let events = stream::unfold(state, |(mut lines, mut decoder, mut queue, mut ended)| async move {
		loop {
			if let Some(event) = queue.pop_front() {
				return Some((Ok(event), (lines, decoder, queue, ended)));
			}
			if ended {
				return None;
			}

			match lines.next().await {
				Some(Ok(line)) => match decoder.push_line(&line) {
					Ok(events) => {
						queue.extend(events);

						ended = decoder.is_done();
					},
					Err(err) => return Some((Err(err), (lines, decoder, queue, true))),
				},
				Some(Err(err)) => return Some((Err(err), (lines, decoder, queue, true))),
				None => {
					queue.extend(decoder.finish());

					ended = true;
				},
			}
		}
	});

	Box::pin(events)
}

fn stream_lines<S, B>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
	S: Stream<Item = reqwest::Result<B>> + Send + 'static,
	B: AsRef<[u8]> + Send,
{
	// Bytes stay raw until a whole line is buffered, so a character split across chunks survives.
	stream::unfold((Box::pin(byte_stream), Vec::<u8>::new()), |(mut bytes, mut buffer)| async move {
		loop {
			if let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
				let raw: Vec<u8> = buffer.drain(..=newline).collect();

				match decode_line(raw) {
					Ok(line) if line.trim().is_empty() => continue,
					Ok(line) => return Some((Ok(line), (bytes, buffer))),
					Err(err) => return Some((Err(err), (bytes, buffer))),
				}
			}

			match bytes.next().await {
				Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
				Some(Err(err)) => return Some((Err(Error::from(err)), (bytes, buffer))),
				None => {
					if buffer.is_empty() {
						return None;
					}

					let rest = decode_line(std::mem::take(&mut buffer));

					match rest {
						Ok(line) if line.trim().is_empty() => return None,
						rest => return Some((rest, (bytes, buffer))),
					}
				},
			}
		}
	})
}

fn decode_line(raw: Vec<u8>) -> Result<String> {
	let line = String::from_utf8(raw)
		.map_err(|err| Error::response(format!("Chat stream line is not valid UTF-8: {err}.")))?;

	Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Prefix for tool call ids the provider left out, distinct for every model step.
fn fallback_step() -> String {
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis())
		.unwrap_or_default();
	let seq = FALLBACK_STEPS.fetch_add(1, Ordering::Relaxed);

	format!("call_{millis:x}_{seq}")
}
