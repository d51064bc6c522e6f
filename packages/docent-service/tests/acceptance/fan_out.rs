use std::sync::atomic::Ordering;

use docent_service::{NO_CONTEXT_ANSWER, ToolResultKind};

use super::{Harness, context, passage};

fn many_passages(count: usize) -> Vec<super::Passage> {
	(0..count)
		.map(|idx| passage(&format!("p-{idx}"), "doc-42", &format!("Fact number {idx}.")))
		.collect()
}

#[tokio::test]
async fn retrieval_is_bounded_by_k_and_n() {
	let harness = Harness::builder().passages(many_passages(30)).build();
	let retrieval = harness
		.service
		.tool
		.retrieve("facts", &context("doc-42"))
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(retrieval.candidate_count, 10);
	assert_eq!(retrieval.passages.len(), 4);
	assert_eq!(*harness.rerank.doc_counts.lock().expect("doc counts lock"), vec![10]);
}

#[tokio::test]
async fn fewer_candidates_than_n_are_all_kept() {
	let harness = Harness::builder().passages(many_passages(2)).build();
	let retrieval = harness
		.service
		.tool
		.retrieve("facts", &context("doc-42"))
		.await
		.expect("Retrieval should succeed.");

	assert_eq!(retrieval.candidate_count, 2);
	assert_eq!(retrieval.passages.len(), 2);
}

#[tokio::test]
async fn rerank_can_promote_a_low_similarity_passage() {
	let mut passages = many_passages(9);

	passages.push(passage("p-boost", "doc-42", "[boost] The decisive fact."));

	let harness = Harness::builder().passages(passages).build();
	let retrieval = harness
		.service
		.tool
		.retrieve("facts", &context("doc-42"))
		.await
		.expect("Retrieval should succeed.");
	let first = &retrieval.passages[0];

	assert_eq!(first.candidate.passage.id, "p-boost");
	assert_eq!(first.candidate.rank, 10);

	let ranks: Vec<u32> = retrieval.passages[1..].iter().map(|item| item.candidate.rank).collect();

	assert_eq!(ranks, vec![1, 2, 3]);
}

#[tokio::test]
async fn empty_store_returns_no_context_without_model_calls() {
	let harness = Harness::builder().build();
	let result = harness.service.tool.search("anything at all", &context("doc-42")).await;

	assert_eq!(result.kind, ToolResultKind::NoContext);
	assert_eq!(result.text, NO_CONTEXT_ANSWER);
	assert_eq!(harness.rerank.calls.load(Ordering::SeqCst), 0);
	assert_eq!(harness.chat.complete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn out_of_band_deletion_yields_no_context() {
	let harness = Harness::builder().passages(many_passages(3)).build();
	let report =
		harness.service.delete_by_fingerprint("doc-42").await.expect("Delete should succeed.");

	assert_eq!(report.deleted, 3);
	assert_eq!(harness.service.count_by_fingerprint("doc-42").await.expect("count"), 0);

	let result = harness.service.tool.search("facts", &context("doc-42")).await;

	assert_eq!(result.kind, ToolResultKind::NoContext);
}
