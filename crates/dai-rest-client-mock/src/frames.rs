//! Frame fixtures matching what the task server emits

use dai_api_contract::*;
use serde::Serialize;
use serde_json::Value;

fn frame<T: Serialize>(name: EventName, payload: &T) -> SseFrame {
    // Contract payload types always serialize.
    let data = serde_json::to_string(payload).unwrap_or_default();
    SseFrame::new(name.as_str(), data)
}

fn bare(name: EventName) -> SseFrame {
    SseFrame::new(name.as_str(), "")
}

pub fn message_start() -> SseFrame {
    bare(EventName::MessageStart)
}

pub fn message_end() -> SseFrame {
    bare(EventName::MessageEnd)
}

pub fn task_done() -> SseFrame {
    bare(EventName::TaskDone)
}

pub fn task_interrupted() -> SseFrame {
    bare(EventName::TaskInterrupted)
}

pub fn text(content: &str) -> SseFrame {
    frame(
        EventName::MessageChunk,
        &MessageChunk::Text {
            content: content.to_string(),
        },
    )
}

pub fn reasoning(content: &str) -> SseFrame {
    frame(
        EventName::MessageChunk,
        &MessageChunk::Reasoning {
            content: content.to_string(),
        },
    )
}

pub fn tool_call(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> SseFrame {
    frame(
        EventName::MessageChunk,
        &MessageChunk::ToolCall {
            data: ToolCallChunk {
                index,
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: arguments.to_string(),
            },
        },
    )
}

pub fn tool_executed(tool_call_id: &str, result: Value) -> SseFrame {
    frame(
        EventName::ToolExecuted,
        &ToolExecuted {
            tool_call_id: tool_call_id.to_string(),
            result: Some(result),
            error: None,
        },
    )
}

pub fn tool_failed(tool_call_id: &str, error: &str) -> SseFrame {
    frame(
        EventName::ToolExecuted,
        &ToolExecuted {
            tool_call_id: tool_call_id.to_string(),
            result: None,
            error: Some(error.to_string()),
        },
    )
}

pub fn require_user_response(tool_name: &str) -> SseFrame {
    frame(
        EventName::ToolRequireUserResponse,
        &ToolRequireUserResponse {
            tool_name: tool_name.to_string(),
        },
    )
}

pub fn require_permission(tool_call_id: &str) -> SseFrame {
    frame(
        EventName::ToolRequirePermission,
        &ToolRequirePermission {
            tool_call_id: tool_call_id.to_string(),
        },
    )
}

pub fn error(message: &str) -> SseFrame {
    frame(
        EventName::Error,
        &ErrorPayload {
            message: message.to_string(),
        },
    )
}

/// A frame with a payload that is not valid JSON
pub fn malformed(name: EventName) -> SseFrame {
    SseFrame::new(name.as_str(), "{\"type\":")
}
