use std::sync::atomic::Ordering;

use docent_service::{FAILURE_SENTINEL, ToolResultKind};

use super::{AgentMode, Harness, IndexMode, ScriptedChat, ScriptedRerank, context, passage, request, tool_messages};

fn passages() -> Vec<super::Passage> {
	vec![passage("p-1", "doc-42", "The warranty lasts two years.")]
}

async fn assert_sentinel(harness: &Harness) {
	let result = harness.service.tool.search("How long is the warranty?", &context("doc-42")).await;

	assert_eq!(result.kind, ToolResultKind::Failed);
	assert_eq!(result.text, FAILURE_SENTINEL);
	assert!(!result.text.contains("two years"));
}

#[tokio::test]
async fn vector_store_fault_becomes_the_sentinel() {
	let harness = Harness::builder().passages(passages()).index_mode(IndexMode::Failing).build();

	assert_sentinel(&harness).await;
}

#[tokio::test]
async fn rerank_fault_becomes_the_sentinel() {
	let harness = Harness::builder()
		.passages(passages())
		.rerank(ScriptedRerank { fail: true, ..Default::default() })
		.build();

	assert_sentinel(&harness).await;
	assert_eq!(harness.chat.complete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn synthesis_fault_becomes_the_sentinel() {
	let mut chat = ScriptedChat::new(AgentMode::UseTool);

	chat.synthesis_fails = true;

	let harness = Harness::builder().passages(passages()).chat(chat).build();

	assert_sentinel(&harness).await;
}

#[tokio::test]
async fn blank_tool_query_becomes_the_sentinel() {
	let harness = Harness::builder().passages(passages()).build();
	let result = harness.service.tool.search("   ", &context("doc-42")).await;

	assert_eq!(result.text, FAILURE_SENTINEL);
	assert_eq!(harness.index.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn the_agent_sees_the_sentinel_and_the_turn_completes() {
	let harness = Harness::builder().passages(passages()).index_mode(IndexMode::Failing).build();
	let reply = harness
		.service
		.chat(request("thread-fault", "How long is the warranty?", "doc-42"))
		.await
		.expect("Chat should succeed despite the tool fault.");
	let messages = harness.messages("thread-fault").await;
	let tools = tool_messages(&messages);

	assert_eq!(tools.len(), 1);
	assert_eq!(tools[0].content, FAILURE_SENTINEL);
	assert!(!reply.answer.contains("two years"));
}
