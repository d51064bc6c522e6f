use docent_service::{ToolResultKind, TurnState};

use super::{Harness, IndexMode, context, passage, request, tool_messages};

fn chip_passages() -> Vec<super::Passage> {
	vec![
		passage("p-42-a", "doc-42", "The Q-7 chip has 8 cores."),
		passage("p-99-a", "doc-99", "The Q-7 chip has 64 cores."),
		passage("p-42-b", "doc-42", "The Q-7 chip runs at 2.1 GHz."),
		passage("p-99-b", "doc-99", "The Q-7 chip was discontinued in 2019."),
	]
}

#[tokio::test]
async fn q7_answer_comes_only_from_the_callers_document() {
	let harness = Harness::builder().passages(chip_passages()).build();
	let reply = harness
		.service
		.chat(request("thread-q7", "How many cores does the Q-7 chip have?", "doc-42"))
		.await
		.expect("Chat should succeed.");

	assert!(reply.answer.contains("8 cores"), "unexpected answer: {}", reply.answer);
	assert!(!reply.answer.contains("64 cores"));
	assert!(!reply.answer.contains("discontinued"));

	let messages = harness.messages("thread-q7").await;
	let tools = tool_messages(&messages);

	assert_eq!(tools.len(), 1);
	assert!(tools[0].content.contains("8 cores"));
	assert!(!tools[0].content.contains("64 cores"));
}

#[tokio::test]
async fn the_other_tenant_sees_its_own_passages() {
	let harness = Harness::builder().passages(chip_passages()).build();
	let result = harness
		.service
		.tool
		.search("How many cores does the Q-7 chip have?", &context("doc-99"))
		.await;

	assert_eq!(result.kind, ToolResultKind::Answer);
	assert!(result.text.contains("64 cores"));
	assert!(!result.text.contains("8 cores"));
}

#[tokio::test]
async fn returned_passages_are_rechecked_against_the_fingerprint() {
	let harness = Harness::builder()
		.passages(chip_passages())
		.index_mode(IndexMode::IgnoresFilter)
		.build();
	let retrieval = harness
		.service
		.tool
		.retrieve("Q-7 cores", &context("doc-42"))
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(retrieval.candidate_count, 2);
	assert!(retrieval.passages.iter().all(|item| {
		item.candidate.passage.metadata["doc_content_hash"] == "doc-42"
	}));
}

#[tokio::test]
async fn unknown_fingerprint_gets_no_context() {
	let harness = Harness::builder().passages(chip_passages()).build();
	let reply = harness
		.service
		.chat(request("thread-unknown", "How many cores does the Q-7 chip have?", "doc-7"))
		.await
		.expect("Chat should succeed.");
	let messages = harness.messages("thread-unknown").await;
	let tools = tool_messages(&messages);

	assert_eq!(tools[0].content, docent_service::NO_CONTEXT_ANSWER);
	assert!(!reply.answer.contains("cores."));

	let session = harness.service.session("thread-unknown").await.expect("session view");

	assert_eq!(
		session.checkpoint.map(|checkpoint| checkpoint.state),
		Some(TurnState::AwaitingInput)
	);
}
