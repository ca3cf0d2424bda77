//! Run state machine for a single task.
//!
//! [`RunMachine`] is a reducer: it takes decoded stream events one at a time
//! and applies them to the task transcript it is handed, reporting what
//! changed. It performs no I/O, so it can be driven directly in tests.

use dai_api_contract::{AssistantMessage, Message, MessageChunk, StreamEvent, ToolExecuted};
use std::fmt;
use tracing::{debug, warn};

use crate::accumulator::{tool_message, ToolCallAccumulator};
use crate::error::{Error, Result};

/// Whether a task run is in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// No connection; new input is accepted
    #[default]
    Idle,
    /// Stream requested, no assistant output seen yet
    Waiting,
    /// Assistant output is streaming
    Running,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Idle => "idle",
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
        })
    }
}

/// Something the server is blocked on until the user acts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// A user-facing tool (e.g. `ask_user`) needs an answer
    UserResponse { tool_name: String },
    /// A tool call needs explicit approval before it runs
    Permission { tool_call_id: String },
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// `TASK_DONE`
    Done,
    /// `TASK_INTERRUPTED`; the task can be continued
    Interrupted,
    /// `ERROR` event or transport failure
    Failed(String),
    /// The stream ended without a terminal event
    Closed,
    /// The user cancelled the run
    Cancelled,
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing visible changed
    Unchanged,
    /// The transcript changed
    Updated,
    /// The server now waits for the user
    AwaitingUser(PendingAction),
    /// The run is over and the machine is idle again
    Ended(RunEnd),
}

#[derive(Debug, Default)]
pub struct RunMachine {
    state: TaskState,
    tool_calls: ToolCallAccumulator,
    pending: Option<PendingAction>,
}

impl RunMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TaskState::Idle
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// Enter `waiting` for a new run (submit, continue or answer).
    ///
    /// Only allowed from `idle`; anything else is rejected rather than
    /// queued.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TaskState::Idle {
            return Err(Error::Busy { state: self.state });
        }
        self.state = TaskState::Waiting;
        self.pending = None;
        self.tool_calls.clear();
        Ok(())
    }

    /// End the current run, whatever state it is in.
    ///
    /// Returns [`Outcome::Unchanged`] when there was no run to end.
    pub fn finish(&mut self, end: RunEnd) -> Outcome {
        if self.state == TaskState::Idle {
            return Outcome::Unchanged;
        }
        debug!(from = %self.state, ?end, "run finished");
        self.state = TaskState::Idle;
        self.tool_calls.clear();
        Outcome::Ended(end)
    }

    /// Apply one decoded event to `messages`
    pub fn apply(&mut self, messages: &mut Vec<Message>, event: StreamEvent) -> Outcome {
        if self.state == TaskState::Idle {
            warn!(event = %event.name(), "dropping event received while idle");
            return Outcome::Unchanged;
        }

        match event {
            StreamEvent::MessageStart => {
                self.tool_calls.clear();
                self.state = TaskState::Running;
                messages.push(Message::Assistant(AssistantMessage::default()));
                Outcome::Updated
            }
            StreamEvent::MessageChunk(chunk) => self.apply_chunk(messages, chunk),
            StreamEvent::MessageEnd => self.end_turn(messages),
            StreamEvent::ToolExecuted(executed) => record_tool_result(messages, executed),
            StreamEvent::ToolRequireUserResponse(payload) => {
                self.await_user(PendingAction::UserResponse {
                    tool_name: payload.tool_name,
                })
            }
            StreamEvent::ToolRequirePermission(payload) => {
                self.await_user(PendingAction::Permission {
                    tool_call_id: payload.tool_call_id,
                })
            }
            StreamEvent::TaskDone => self.finish(RunEnd::Done),
            StreamEvent::TaskInterrupted => self.finish(RunEnd::Interrupted),
            StreamEvent::Error(payload) => self.finish(RunEnd::Failed(payload.message)),
        }
    }

    fn apply_chunk(&mut self, messages: &mut Vec<Message>, chunk: MessageChunk) -> Outcome {
        let outcome = match chunk {
            MessageChunk::Text { content } => {
                current_assistant(messages).content.push_str(&content);
                Outcome::Updated
            }
            MessageChunk::Reasoning { content } => {
                current_assistant(messages)
                    .reasoning_content
                    .get_or_insert_with(String::new)
                    .push_str(&content);
                Outcome::Updated
            }
            MessageChunk::ToolCall { data } => {
                let created = !matches!(messages.last(), Some(Message::Assistant(_)));
                current_assistant(messages);
                self.tool_calls.observe(data);
                if created {
                    Outcome::Updated
                } else {
                    Outcome::Unchanged
                }
            }
            MessageChunk::Unknown => {
                warn!("ignoring message chunk of unknown type");
                return Outcome::Unchanged;
            }
        };
        self.state = TaskState::Running;
        outcome
    }

    fn end_turn(&mut self, messages: &mut Vec<Message>) -> Outcome {
        self.state = TaskState::Running;
        let calls = self.tool_calls.drain();
        if calls.is_empty() {
            return Outcome::Unchanged;
        }

        let tool_messages: Vec<Message> = calls
            .iter()
            .map(|call| Message::Tool(tool_message(call)))
            .collect();
        if let Some(Message::Assistant(assistant)) = messages.last_mut() {
            assistant.tool_calls = Some(calls);
        }
        messages.extend(tool_messages);
        Outcome::Updated
    }

    fn await_user(&mut self, action: PendingAction) -> Outcome {
        self.pending = Some(action.clone());
        Outcome::AwaitingUser(action)
    }
}

/// The assistant message chunks belong to, created if the transcript does
/// not end in one
fn current_assistant(messages: &mut Vec<Message>) -> &mut AssistantMessage {
    if !matches!(messages.last(), Some(Message::Assistant(_))) {
        messages.push(Message::Assistant(AssistantMessage::default()));
    }
    match messages.last_mut() {
        Some(Message::Assistant(assistant)) => assistant,
        _ => unreachable!("an assistant message was just ensured"),
    }
}

fn record_tool_result(messages: &mut [Message], executed: ToolExecuted) -> Outcome {
    let tool = messages.iter_mut().rev().find_map(|message| match message {
        Message::Tool(tool) if tool.id == executed.tool_call_id => Some(tool),
        _ => None,
    });

    match tool {
        Some(tool) => {
            tool.result = executed.result;
            tool.error = executed.error;
            Outcome::Updated
        }
        None => {
            warn!(tool_call_id = %executed.tool_call_id, "result for unknown tool call");
            Outcome::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dai_api_contract::{ErrorPayload, ToolCallChunk, ToolRequirePermission};
    use serde_json::json;

    fn text(content: &str) -> StreamEvent {
        StreamEvent::MessageChunk(MessageChunk::Text {
            content: content.into(),
        })
    }

    fn tool_chunk(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> StreamEvent {
        StreamEvent::MessageChunk(MessageChunk::ToolCall {
            data: ToolCallChunk {
                index,
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: args.into(),
            },
        })
    }

    fn running(messages: &mut Vec<Message>) -> RunMachine {
        let mut machine = RunMachine::new();
        machine.begin().unwrap();
        machine.apply(messages, StreamEvent::MessageStart);
        machine
    }

    #[test]
    fn test_begin_rejects_reentry() {
        let mut machine = RunMachine::new();
        machine.begin().unwrap();
        assert_eq!(machine.state(), TaskState::Waiting);
        assert!(matches!(
            machine.begin(),
            Err(Error::Busy {
                state: TaskState::Waiting
            })
        ));

        let mut messages = vec![];
        machine.apply(&mut messages, StreamEvent::MessageStart);
        assert!(matches!(
            machine.begin(),
            Err(Error::Busy {
                state: TaskState::Running
            })
        ));
    }

    #[test]
    fn test_text_turn_builds_one_assistant_message() {
        let mut messages = vec![Message::user("hi")];
        let mut machine = running(&mut messages);
        assert_eq!(machine.state(), TaskState::Running);

        machine.apply(&mut messages, text("Hel"));
        machine.apply(&mut messages, text("lo"));
        assert_eq!(
            machine.apply(&mut messages, StreamEvent::MessageEnd),
            Outcome::Unchanged
        );
        assert_eq!(
            machine.apply(&mut messages, StreamEvent::TaskDone),
            Outcome::Ended(RunEnd::Done)
        );

        assert_eq!(machine.state(), TaskState::Idle);
        assert_eq!(messages.len(), 2);
        let assistant = messages[1].as_assistant().unwrap();
        assert_eq!(assistant.content, "Hello");
        assert_eq!(assistant.tool_calls, None);
    }

    #[test]
    fn test_tool_messages_appear_only_at_turn_end() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);

        machine.apply(&mut messages, tool_chunk(0, Some("c1"), Some("search"), r#"{"q":"#));
        machine.apply(&mut messages, tool_chunk(0, None, None, r#""x"}"#));
        assert_eq!(messages.len(), 1);

        assert_eq!(
            machine.apply(&mut messages, StreamEvent::MessageEnd),
            Outcome::Updated
        );
        assert_eq!(messages.len(), 2);

        let assistant = messages[0].as_assistant().unwrap();
        assert_eq!(assistant.tool_calls.as_ref().unwrap()[0].arguments, r#"{"q":"x"}"#);

        let tool = messages[1].as_tool().unwrap();
        assert_eq!(tool.id, "c1");
        assert_eq!(tool.name, "search");
        assert_eq!(serde_json::Value::Object(tool.arguments.clone()), json!({"q": "x"}));
        assert_eq!(tool.result, None);
    }

    #[test]
    fn test_new_turn_discards_stale_fragments() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);
        machine.apply(&mut messages, tool_chunk(0, Some("old"), Some("search"), "{"));

        machine.apply(&mut messages, StreamEvent::MessageStart);
        machine.apply(&mut messages, StreamEvent::MessageEnd);

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.as_tool().is_none()));
    }

    #[test]
    fn test_chunk_before_start_promotes_waiting() {
        let mut messages = vec![Message::user("hi")];
        let mut machine = RunMachine::new();
        machine.begin().unwrap();

        assert_eq!(machine.apply(&mut messages, text("a")), Outcome::Updated);
        assert_eq!(machine.state(), TaskState::Running);
        assert_eq!(messages[1].as_assistant().unwrap().content, "a");
    }

    #[test]
    fn test_unknown_chunk_changes_nothing() {
        let mut messages = vec![Message::user("hi")];
        let mut machine = RunMachine::new();
        machine.begin().unwrap();

        let unknown = StreamEvent::MessageChunk(MessageChunk::Unknown);
        assert_eq!(machine.apply(&mut messages, unknown), Outcome::Unchanged);
        assert_eq!(machine.state(), TaskState::Waiting);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_reasoning_accumulates_separately() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);
        machine.apply(
            &mut messages,
            StreamEvent::MessageChunk(MessageChunk::Reasoning {
                content: "think".into(),
            }),
        );
        machine.apply(&mut messages, text("say"));

        let assistant = messages[0].as_assistant().unwrap();
        assert_eq!(assistant.reasoning_content.as_deref(), Some("think"));
        assert_eq!(assistant.content, "say");
    }

    #[test]
    fn test_tool_executed_fills_result_by_id() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);
        machine.apply(&mut messages, tool_chunk(0, Some("c1"), Some("a"), "{}"));
        machine.apply(&mut messages, tool_chunk(1, Some("c2"), Some("b"), "{}"));
        machine.apply(&mut messages, StreamEvent::MessageEnd);

        let outcome = machine.apply(
            &mut messages,
            StreamEvent::ToolExecuted(ToolExecuted {
                tool_call_id: "c2".into(),
                result: Some(json!("ok")),
                error: None,
            }),
        );
        assert_eq!(outcome, Outcome::Updated);
        assert_eq!(messages[1].as_tool().unwrap().result, None);
        assert_eq!(messages[2].as_tool().unwrap().result, Some(json!("ok")));

        let outcome = machine.apply(
            &mut messages,
            StreamEvent::ToolExecuted(ToolExecuted {
                tool_call_id: "missing".into(),
                result: None,
                error: Some("boom".into()),
            }),
        );
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(machine.state(), TaskState::Running);
    }

    #[test]
    fn test_permission_request_is_pending_until_next_run() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);
        let outcome = machine.apply(
            &mut messages,
            StreamEvent::ToolRequirePermission(ToolRequirePermission {
                tool_call_id: "c1".into(),
            }),
        );
        let expected = PendingAction::Permission {
            tool_call_id: "c1".into(),
        };
        assert_eq!(outcome, Outcome::AwaitingUser(expected.clone()));
        assert_eq!(machine.state(), TaskState::Running);

        machine.finish(RunEnd::Closed);
        assert_eq!(machine.pending(), Some(&expected));

        machine.begin().unwrap();
        assert_eq!(machine.pending(), None);
    }

    #[test]
    fn test_error_keeps_partial_transcript() {
        let mut messages = vec![];
        let mut machine = running(&mut messages);
        machine.apply(&mut messages, text("partial"));

        let outcome = machine.apply(
            &mut messages,
            StreamEvent::Error(ErrorPayload {
                message: "rate limited".into(),
            }),
        );
        assert_eq!(outcome, Outcome::Ended(RunEnd::Failed("rate limited".into())));
        assert!(machine.is_idle());
        assert_eq!(messages[0].as_assistant().unwrap().content, "partial");
    }

    #[test]
    fn test_events_while_idle_are_dropped() {
        let mut messages = vec![];
        let mut machine = RunMachine::new();
        assert_eq!(
            machine.apply(&mut messages, StreamEvent::MessageStart),
            Outcome::Unchanged
        );
        assert!(messages.is_empty());
        assert_eq!(machine.finish(RunEnd::Cancelled), Outcome::Unchanged);
    }
}
