use std::collections::HashSet;

use docent_providers::chat::{ChatMessage, ToolCallRequest};

use crate::{
	retrieval::TOOL_NAME,
	session::{Checkpoint, Message, MessageRole},
};

pub const DEFAULT_SYSTEM_POLICY: &str = concat!(
	"You are a helpful assistant with one tool, `search_vdb`, which searches the user's document.\n",
	"Follow these rules:\n",
	"1. Call `search_vdb` when the user asks about something outside your own knowledge, or when ",
	"you need the document to confirm an answer. Otherwise answer directly without the tool.\n",
	"2. Always pass the user's original query, word for word, as the `query` argument.\n",
	"3. If the tool returns an error message, do not invent any context. Tell the user the lookup ",
	"failed.\n",
	"4. If the tool reports that no relevant context was found, tell the user that the document ",
	"contains no information on the question.",
);

/// The model's choice for one Deciding step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
	Respond(String),
	CallTool(Vec<ToolCallRequest>),
}

/// The most recent `limit` messages in wire form.
///
/// Tool results whose requesting assistant message is not in the window are left out, since
/// providers reject a tool message without its call.
pub fn history_window(messages: &[Message], limit: usize) -> Vec<ChatMessage> {
	let start = messages.len().saturating_sub(limit);
	let mut requested = HashSet::new();

	messages[start..]
		.iter()
		.filter(|message| match message.role {
			MessageRole::Tool => message.tool_call_id().is_some_and(|id| requested.contains(id)),
			_ => {
				requested.extend(message.tool_calls().iter().map(|call| call.id.as_str()));

				true
			},
		})
		.map(to_chat_message)
		.collect()
}

/// Tool calls that were requested but never answered, in request order.
pub fn unanswered_calls(messages: &[Message], checkpoint: Option<&Checkpoint>) -> Vec<ToolCallRequest> {
	let answered: HashSet<&str> = messages.iter().filter_map(Message::tool_call_id).collect();
	let mut seen = HashSet::new();
	let requested = messages
		.iter()
		.flat_map(|message| message.tool_calls().iter())
		.chain(checkpoint.into_iter().flat_map(|checkpoint| checkpoint.pending_tool_calls.iter()));

	requested
		.filter(|call| !answered.contains(call.id.as_str()))
		.filter(|call| seen.insert(call.id.clone()))
		.cloned()
		.collect()
}

/// The `query` argument the model supplied, if the arguments parse.
pub fn requested_query(call: &ToolCallRequest) -> Option<String> {
	let value: serde_json::Value = serde_json::from_str(&call.arguments).ok()?;

	value.get("query")?.as_str().map(str::to_string)
}

pub fn is_known_tool(name: &str) -> bool {
	name == TOOL_NAME
}

fn to_chat_message(message: &Message) -> ChatMessage {
	match message.role {
		MessageRole::User => ChatMessage::user(message.content.as_str()),
		MessageRole::Assistant if !message.tool_calls().is_empty() =>
			ChatMessage::assistant_tool_calls(message.content.as_str(), message.tool_calls().to_vec()),
		MessageRole::Assistant => ChatMessage::assistant(message.content.as_str()),
		MessageRole::Tool =>
			ChatMessage::tool(message.tool_call_id().unwrap_or_default(), message.content.as_str()),
	}
}
