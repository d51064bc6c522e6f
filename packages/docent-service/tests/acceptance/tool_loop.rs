use std::sync::atomic::Ordering;

use docent_service::{FAILURE_SENTINEL, MessageRole};

use super::{AgentMode, Harness, ScriptedChat, passage, request, tool_messages};

fn passages() -> Vec<super::Passage> {
	vec![passage("p-1", "doc-42", "Returns are accepted within 30 days.")]
}

#[tokio::test]
async fn the_original_query_is_used_whatever_the_model_asks() {
	let harness = Harness::builder()
		.passages(passages())
		.chat(ScriptedChat::new(AgentMode::RewriteQuery("refund policy summary".to_string())))
		.build();

	harness
		.service
		.chat(request("thread-rewrite", "Can I return my order?", "doc-42"))
		.await
		.expect("chat");

	let embedded = harness.embedding.texts.lock().expect("texts lock").clone();

	assert_eq!(embedded, vec!["Can I return my order?".to_string()]);
}

#[tokio::test]
async fn direct_answers_skip_the_tool() {
	let harness = Harness::builder()
		.passages(passages())
		.chat(ScriptedChat::new(AgentMode::Direct))
		.build();
	let reply = harness
		.service
		.chat(request("thread-direct", "Hello there", "doc-42"))
		.await
		.expect("chat");
	let messages = harness.messages("thread-direct").await;

	assert_eq!(reply.answer, "Direct answer to: Hello there");
	assert_eq!(messages.len(), 2);
	assert_eq!(harness.index.queries.load(Ordering::SeqCst), 0);
	assert_eq!(harness.index_factory.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_tools_get_the_sentinel() {
	let harness = Harness::builder()
		.passages(passages())
		.chat(ScriptedChat::new(AgentMode::UnknownTool("web_search".to_string())))
		.build();

	harness
		.service
		.chat(request("thread-unknown-tool", "Can I return my order?", "doc-42"))
		.await
		.expect("chat");

	let messages = harness.messages("thread-unknown-tool").await;
	let tools = tool_messages(&messages);

	assert_eq!(tools.len(), 1);
	assert_eq!(tools[0].content, FAILURE_SENTINEL);
	assert!(harness.embedding.texts.lock().expect("texts lock").is_empty());
}

#[tokio::test]
async fn tool_rounds_are_bounded() {
	let harness = Harness::builder()
		.passages(passages())
		.chat(ScriptedChat::new(AgentMode::AlwaysTool))
		.configure(|cfg| cfg.agent.max_tool_rounds = 2)
		.build();
	let reply = harness
		.service
		.chat(request("thread-bounded", "Can I return my order?", "doc-42"))
		.await
		.expect("chat");
	let messages = harness.messages("thread-bounded").await;
	let offered: Vec<usize> = harness
		.chat
		.stream_calls
		.lock()
		.expect("stream calls lock")
		.iter()
		.map(|call| call.tools_offered)
		.collect();

	assert_eq!(offered, vec![1, 1, 0]);
	assert_eq!(tool_messages(&messages).len(), 2);
	assert_eq!(messages.last().map(|message| message.role), Some(MessageRole::Assistant));
	assert!(reply.answer.starts_with("Based on the document:"));
}

#[tokio::test]
async fn history_window_is_applied() {
	let harness = Harness::builder()
		.passages(passages())
		.chat(ScriptedChat::new(AgentMode::Direct))
		.configure(|cfg| cfg.agent.history_limit = 3)
		.build();

	for input in ["one", "two", "three"] {
		harness.service.chat(request("thread-window", input, "doc-42")).await.expect("chat");
	}

	let calls = harness.chat.stream_calls.lock().expect("stream calls lock");
	let last = calls.last().expect("at least one model call");

	// System policy plus the three most recent messages.
	assert_eq!(last.messages.len(), 4);
	assert_eq!(last.messages[3].content, "three");
}
