use std::time::Duration;

use futures_util::StreamExt;

use docent_service::{Error, MessageRole, ToolResultKind, TurnEvent, TurnState};

use super::{AgentMode, Harness, ScriptedChat, passage, request};

fn passages() -> Vec<super::Passage> {
	vec![passage("p-1", "doc-42", "Shipping takes five business days.")]
}

#[tokio::test]
async fn events_arrive_in_turn_order() {
	let harness = Harness::builder().passages(passages()).build();
	let events: Vec<TurnEvent> = harness
		.service
		.chat_stream(request("thread-stream", "How long is shipping?", "doc-42"))
		.await
		.expect("Stream should start.")
		.collect()
		.await;
	let names: Vec<&str> = events.iter().map(TurnEvent::name).collect();

	assert_eq!(names.first(), Some(&"tool_call"));
	assert_eq!(names.get(1), Some(&"tool_result"));
	assert_eq!(names.last(), Some(&"done"));
	assert!(names[2..names.len() - 1].iter().all(|name| *name == "delta"));

	let TurnEvent::ToolCall { query, .. } = &events[0] else {
		panic!("First event should be a tool call.");
	};

	assert_eq!(query, "How long is shipping?");

	let TurnEvent::ToolResult { kind, content, .. } = &events[1] else {
		panic!("Second event should be a tool result.");
	};

	assert_eq!(*kind, ToolResultKind::Answer);
	assert!(content.contains("five business days"));

	let streamed: String = events
		.iter()
		.filter_map(|event| match event {
			TurnEvent::Delta { text } => Some(text.as_str()),
			_ => None,
		})
		.collect();
	let TurnEvent::Done { answer, .. } = events.last().expect("done event") else {
		panic!("Last event should be done.");
	};

	assert_eq!(&streamed, answer);
}

#[tokio::test]
async fn store_failure_before_the_first_event_is_an_error() {
	let harness = Harness::builder()
		.passages(passages())
		.sessions(std::sync::Arc::new(super::UnavailableSessionStore))
		.build();
	let err = match harness
		.service
		.chat_stream(request("thread-down", "How long is shipping?", "doc-42"))
		.await
	{
		Ok(_) => panic!("Stream should not start without a session store."),
		Err(err) => err,
	};

	assert!(matches!(err, Error::Session { .. }));
	assert_eq!(harness.stream_calls(), 0);
}

#[tokio::test]
async fn failures_after_the_start_end_with_an_error_event() {
	let harness = Harness::builder()
		.passages(passages())
		.sessions(std::sync::Arc::new(super::FailingAfterStore::new(1)))
		.build();
	let events: Vec<TurnEvent> = harness
		.service
		.chat_stream(request("thread-error", "How long is shipping?", "doc-42"))
		.await
		.expect("Stream should start.")
		.collect()
		.await;

	assert_eq!(events.len(), 1);
	assert!(matches!(&events[0], TurnEvent::Error { message } if message.contains("unreachable")));
}

#[tokio::test]
async fn disconnect_keeps_the_partial_answer() {
	let mut chat = ScriptedChat::new(AgentMode::Direct);

	chat.chunk_delay = Some(Duration::from_millis(30));

	let harness = Harness::builder().passages(passages()).chat(chat).build();
	let mut stream = harness
		.service
		.chat_stream(request("thread-drop", "Tell me a long story please", "doc-42"))
		.await
		.expect("Stream should start.");
	let first = stream.next().await.expect("first delta");

	assert!(matches!(first, TurnEvent::Delta { .. }));

	drop(stream);

	let mut interrupted = None;

	for _ in 0..100 {
		tokio::time::sleep(Duration::from_millis(20)).await;

		let session = harness.service.session("thread-drop").await.expect("session view");
		let done = session
			.checkpoint
			.as_ref()
			.is_some_and(|checkpoint| checkpoint.state == TurnState::AwaitingInput);

		if done && session.messages.len() == 2 {
			interrupted = Some(session);

			break;
		}
	}

	let session = interrupted.expect("The turn should record the partial answer.");
	let partial = &session.messages[1];

	assert_eq!(partial.role, MessageRole::Assistant);
	assert!(partial.payload.as_ref().is_some_and(|payload| payload.interrupted));
	assert!(!partial.content.is_empty());
	assert!("Direct answer to: Tell me a long story please".starts_with(&partial.content));
}
