use docent_service::Error;

use super::{Harness, passage, request};

fn passages() -> Vec<super::Passage> {
	vec![
		passage("p-1", "doc-42", &"A long passage about batteries. ".repeat(10)),
		passage("p-2", "doc-42", "Batteries last five years."),
		passage("p-3", "doc-99", "Unrelated tenant text."),
	]
}

#[tokio::test]
async fn summary_peek_and_counts() {
	let harness = Harness::builder().passages(passages()).build();
	let summary = harness.service.collection_summary().await.expect("summary");

	assert_eq!(summary.collection, "fake_passages");
	assert_eq!(summary.point_count, 3);

	let peeked = harness.service.peek(2).await.expect("peek");

	assert_eq!(peeked.len(), 2);
	assert_eq!(peeked[0].fingerprint.as_deref(), Some("doc-42"));
	assert_eq!(peeked[0].preview.chars().count(), 150);
	assert_eq!(harness.service.count_by_fingerprint("doc-42").await.expect("count"), 2);
	assert_eq!(harness.service.count_by_fingerprint("doc-99").await.expect("count"), 1);
}

#[tokio::test]
async fn invalid_admin_arguments_are_rejected() {
	let harness = Harness::builder().passages(passages()).build();

	assert!(matches!(harness.service.peek(0).await, Err(Error::InvalidRequest { .. })));
	assert!(matches!(
		harness.service.delete_by_fingerprint(" ").await,
		Err(Error::InvalidRequest { .. })
	));
	assert!(matches!(harness.service.session("missing").await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn delete_only_touches_one_tenant() {
	let harness = Harness::builder().passages(passages()).build();
	let report = harness.service.delete_by_fingerprint("doc-42").await.expect("delete");

	assert_eq!(report.deleted, 2);
	assert_eq!(harness.service.count_by_fingerprint("doc-99").await.expect("count"), 1);
}

#[tokio::test]
async fn retrieval_ranks_without_synthesis() {
	let harness = Harness::builder().passages(passages()).build();
	let report = harness
		.service
		.inspect_retrieval("battery life", "doc-42")
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(report.candidate_count, 2);
	assert_eq!(report.passages.len(), 2);
	assert_eq!(report.passages[0].rank, 1);
	assert_eq!(harness.chat.complete_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn session_view_reflects_the_conversation() {
	let harness = Harness::builder().passages(passages()).build();

	harness
		.service
		.chat(request("thread-view", "How long do batteries last?", "doc-42"))
		.await
		.expect("chat");

	let view = harness.service.session("thread-view").await.expect("session view");

	assert_eq!(view.thread_id, "thread-view");
	assert_eq!(view.messages.len(), 4);
	assert!(view.checkpoint.is_some_and(|checkpoint| checkpoint.pending_tool_calls.is_empty()));
}
