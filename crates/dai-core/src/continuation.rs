//! Detection of tasks left mid-run.
//!
//! A transcript loaded from storage may end in a state where the server was
//! still expected to act: a user message with no reply, or tool calls without
//! results. Such tasks are offered a "continue" action that resumes the run
//! with no new input.

use dai_api_contract::Message;

use crate::machine::TaskState;

/// Tool whose call ends a task; it is never waited on
pub const FINISH_TASK_TOOL: &str = "finish_task";

/// Whether `messages` ends mid-run
pub fn needs_continuation(messages: &[Message]) -> bool {
    match messages.last() {
        Some(Message::User(_)) => true,
        Some(Message::Tool(_)) => messages
            .iter()
            .rev()
            .map_while(Message::as_tool)
            .any(|tool| !tool.is_resolved() && tool.name != FINISH_TASK_TOOL),
        Some(Message::Assistant(_)) | Some(Message::System(_)) | None => false,
    }
}

/// Whether a "continue" action should be offered right now.
///
/// Only meaningful when no run is active.
pub fn continuation_offer(state: TaskState, messages: &[Message]) -> bool {
    state == TaskState::Idle && needs_continuation(messages)
}
