use std::sync::Arc;

use docent_providers::chat::ToolCallRequest;
use docent_service::{
	Checkpoint, Error, FAILURE_SENTINEL, MemorySessionStore, MessageRole, NewMessage,
	SessionStore, TOOL_NAME, TurnState,
};

use super::{Harness, UnavailableSessionStore, passage, request, roles};

const TURN: [MessageRole; 4] =
	[MessageRole::User, MessageRole::Assistant, MessageRole::Tool, MessageRole::Assistant];

fn passages() -> Vec<super::Passage> {
	vec![passage("p-1", "doc-42", "The manual covers installation.")]
}

#[tokio::test]
async fn sequential_turns_append_in_order() {
	let harness = Harness::builder().passages(passages()).build();

	for input in ["What does the manual cover?", "And anything else?"] {
		harness.service.chat(request("thread-seq", input, "doc-42")).await.expect("chat");
	}

	let messages = harness.messages("thread-seq").await;

	assert_eq!(roles(&messages), [TURN, TURN].concat());
	assert_eq!(messages.iter().map(|message| message.seq).collect::<Vec<_>>(), (1..=8).collect::<Vec<_>>());
	assert_eq!(messages[0].content, "What does the manual cover?");
	assert_eq!(messages[4].content, "And anything else?");

	let second_turn = harness
		.chat
		.stream_calls
		.lock()
		.expect("stream calls lock")
		.last()
		.map(|call| call.messages.iter().any(|message| message.content == "What does the manual cover?"))
		.unwrap_or(false);

	assert!(second_turn, "Earlier turns should be part of the model's history.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_threads_do_not_interleave() {
	let harness = Arc::new(Harness::builder().passages(passages()).build());
	let mut handles = Vec::new();

	for idx in 0..8 {
		let harness = harness.clone();

		handles.push(tokio::spawn(async move {
			let thread_id = format!("thread-{idx}");

			harness
				.service
				.chat(request(&thread_id, &format!("question {idx}"), "doc-42"))
				.await
				.expect("chat");

			thread_id
		}));
	}

	for handle in handles {
		let thread_id = handle.await.expect("Task should not panic.");
		let messages = harness.messages(&thread_id).await;

		assert_eq!(roles(&messages), TURN.to_vec());
		assert!(messages[0].content.ends_with(thread_id.trim_start_matches("thread-")));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_on_one_thread_are_serialized() {
	let harness = Arc::new(Harness::builder().passages(passages()).build());
	let mut handles = Vec::new();

	for idx in 0..4 {
		let harness = harness.clone();

		handles.push(tokio::spawn(async move {
			harness
				.service
				.chat(request("thread-shared", &format!("question {idx}"), "doc-42"))
				.await
				.expect("chat");
		}));
	}

	for handle in handles {
		handle.await.expect("Task should not panic.");
	}

	let messages = harness.messages("thread-shared").await;

	assert_eq!(roles(&messages), TURN.repeat(4));

	for turn in messages.chunks(4) {
		let call_id = turn[1].tool_calls()[0].id.as_str();

		assert_eq!(turn[2].tool_call_id(), Some(call_id));
		assert!(turn[3].content.starts_with("Based on the document:"));
	}
}

#[tokio::test]
async fn unanswered_tool_calls_are_repaired_on_resume() {
	let store = Arc::new(MemorySessionStore::new());
	let call = ToolCallRequest {
		id: "call_crashed".to_string(),
		name: TOOL_NAME.to_string(),
		arguments: r#"{"query":"before the crash"}"#.to_string(),
	};

	store.append("thread-resume", NewMessage::user("before the crash")).await.expect("append");
	store
		.append("thread-resume", NewMessage::assistant_tool_calls("", vec![call.clone()]))
		.await
		.expect("append");
	store
		.checkpoint("thread-resume", Checkpoint::new(TurnState::ToolCall, 2).with_pending(vec![call]))
		.await
		.expect("checkpoint");

	let harness = Harness::builder().passages(passages()).sessions(store).build();

	harness
		.service
		.chat(request("thread-resume", "What does the manual cover?", "doc-42"))
		.await
		.expect("chat");

	let messages = harness.messages("thread-resume").await;

	assert_eq!(messages[2].role, MessageRole::Tool);
	assert_eq!(messages[2].tool_call_id(), Some("call_crashed"));
	assert_eq!(messages[2].content, FAILURE_SENTINEL);
	assert_eq!(messages[3].content, "What does the manual cover?");
	assert_eq!(roles(&messages[3..]), TURN.to_vec());
}

#[tokio::test]
async fn session_store_failure_aborts_the_request() {
	let harness = Harness::builder()
		.passages(passages())
		.sessions(Arc::new(UnavailableSessionStore))
		.build();
	let err = harness
		.service
		.chat(request("thread-down", "What does the manual cover?", "doc-42"))
		.await
		.expect_err("Chat should fail when history cannot be loaded.");

	assert!(matches!(err, Error::Session { .. }));
	assert_eq!(harness.stream_calls(), 0);
}

#[tokio::test]
async fn blank_requests_are_rejected() {
	let harness = Harness::builder().build();

	for (thread_id, input) in [("", "question"), ("thread", "   ")] {
		let err = harness
			.service
			.chat(request(thread_id, input, "doc-42"))
			.await
			.expect_err("Blank fields should be rejected.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}
}
