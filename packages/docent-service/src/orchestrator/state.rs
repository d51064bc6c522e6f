use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Position of a thread within one conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
	AwaitingInput,
	Deciding,
	ToolCall,
	ToolResult,
	Responding,
}
impl TurnState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AwaitingInput => "awaiting_input",
			Self::Deciding => "deciding",
			Self::ToolCall => "tool_call",
			Self::ToolResult => "tool_result",
			Self::Responding => "responding",
		}
	}

	pub fn next(self, step: Step) -> Result<Self> {
		transition(self, step)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	/// A user message was recorded.
	Input,
	/// The model chose to answer.
	Respond,
	/// The model requested one or more tool calls.
	CallTool,
	/// One tool invocation returned.
	ToolFinished,
	/// Every result of the round is in the history.
	ResultsRecorded,
	/// The assistant message was recorded.
	Finished,
	/// The turn ended early. Always legal.
	Abort,
}

pub fn transition(state: TurnState, step: Step) -> Result<TurnState> {
	use Step::*;
	use TurnState::*;

	match (state, step) {
		(_, Abort) => Ok(AwaitingInput),
		(AwaitingInput, Input) => Ok(Deciding),
		(Deciding, Respond) => Ok(Responding),
		(Deciding, CallTool) => Ok(ToolCall),
		(ToolCall, ToolFinished) => Ok(ToolResult),
		(ToolResult, CallTool) => Ok(ToolCall),
		(ToolResult, ResultsRecorded) => Ok(Deciding),
		(Responding, Finished) => Ok(AwaitingInput),
		(state, step) => Err(Error::InvalidState {
			message: format!("{step:?} is not allowed while {}.", state.as_str()),
		}),
	}
}
