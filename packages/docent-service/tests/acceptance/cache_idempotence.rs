use std::{sync::atomic::Ordering, time::Duration};

use docent_service::{FAILURE_SENTINEL, ToolResultKind};

use super::{Harness, context, passage};

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_callers_share_one_construction() {
	let harness = Harness::builder()
		.passages(vec![passage("p-1", "doc-42", "Shared fact.")])
		.factory_delay(Duration::from_millis(50))
		.build();
	let tool = harness.service.tool.clone();
	let mut handles = Vec::with_capacity(CALLERS);

	for idx in 0..CALLERS {
		let tool = tool.clone();

		handles.push(tokio::spawn(async move {
			tool.search(&format!("question {idx}"), &context("doc-42")).await
		}));
	}

	for handle in handles {
		let result = handle.await.expect("Task should not panic.");

		assert_eq!(result.kind, ToolResultKind::Answer);
	}

	assert_eq!(harness.index_factory.builds.load(Ordering::SeqCst), 1);
	assert_eq!(harness.synthesizer_factory.builds.load(Ordering::SeqCst), 1);

	let first = tool.index().await.expect("cached index");
	let second = tool.index().await.expect("cached index");

	assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn failed_construction_is_retried_on_the_next_call() {
	let harness = Harness::builder()
		.passages(vec![passage("p-1", "doc-42", "Shared fact.")])
		.factory_failures(1)
		.build();
	let first = harness.service.tool.search("question", &context("doc-42")).await;

	assert_eq!(first.text, FAILURE_SENTINEL);

	let second = harness.service.tool.search("question", &context("doc-42")).await;

	assert_eq!(second.kind, ToolResultKind::Answer);
	assert_eq!(harness.index_factory.builds.load(Ordering::SeqCst), 2);
}
