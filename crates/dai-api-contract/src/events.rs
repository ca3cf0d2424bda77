//! Typed task stream events and the frame decoder
//!
//! Every frame on a task stream carries an event name and a JSON payload.
//! [`decode_event`] maps one frame onto one [`StreamEvent`]. It holds no state
//! and performs no I/O, so frames can be tested as literal fixtures.

use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::{
    ErrorPayload, MessageChunk, SseFrame, ToolExecuted, ToolRequirePermission,
    ToolRequireUserResponse,
};

/// Closed set of event names the server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    MessageStart,
    MessageChunk,
    MessageEnd,
    ToolExecuted,
    ToolRequireUserResponse,
    ToolRequirePermission,
    TaskDone,
    TaskInterrupted,
    Error,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::MessageStart,
        EventName::MessageChunk,
        EventName::MessageEnd,
        EventName::ToolExecuted,
        EventName::ToolRequireUserResponse,
        EventName::ToolRequirePermission,
        EventName::TaskDone,
        EventName::TaskInterrupted,
        EventName::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::MessageStart => "MESSAGE_START",
            EventName::MessageChunk => "MESSAGE_CHUNK",
            EventName::MessageEnd => "MESSAGE_END",
            EventName::ToolExecuted => "TOOL_EXECUTED",
            EventName::ToolRequireUserResponse => "TOOL_REQUIRE_USER_RESPONSE",
            EventName::ToolRequirePermission => "TOOL_REQUIRE_PERMISSION",
            EventName::TaskDone => "TASK_DONE",
            EventName::TaskInterrupted => "TASK_INTERRUPTED",
            EventName::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or(())
    }
}

/// A decoded task stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    MessageChunk(MessageChunk),
    MessageEnd,
    ToolExecuted(ToolExecuted),
    ToolRequireUserResponse(ToolRequireUserResponse),
    ToolRequirePermission(ToolRequirePermission),
    TaskDone,
    TaskInterrupted,
    Error(ErrorPayload),
}

impl StreamEvent {
    pub fn name(&self) -> EventName {
        match self {
            StreamEvent::MessageStart => EventName::MessageStart,
            StreamEvent::MessageChunk(_) => EventName::MessageChunk,
            StreamEvent::MessageEnd => EventName::MessageEnd,
            StreamEvent::ToolExecuted(_) => EventName::ToolExecuted,
            StreamEvent::ToolRequireUserResponse(_) => EventName::ToolRequireUserResponse,
            StreamEvent::ToolRequirePermission(_) => EventName::ToolRequirePermission,
            StreamEvent::TaskDone => EventName::TaskDone,
            StreamEvent::TaskInterrupted => EventName::TaskInterrupted,
            StreamEvent::Error(_) => EventName::Error,
        }
    }

    /// Events after which the server sends nothing more for this run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::TaskDone | StreamEvent::TaskInterrupted | StreamEvent::Error(_)
        )
    }
}

/// A frame whose payload could not be decoded
#[derive(Debug, Error)]
#[error("malformed {event} payload: {source}")]
pub struct DecodeError {
    pub event: EventName,
    #[source]
    pub source: serde_json::Error,
}

/// Decode one frame.
///
/// Returns `Ok(None)` for event names outside the protocol; those are logged
/// and otherwise ignored so newer servers can add events.
pub fn decode_event(event: &str, data: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let Ok(name) = event.parse::<EventName>() else {
        tracing::warn!(event, "ignoring unknown task stream event");
        return Ok(None);
    };

    let decoded = match name {
        EventName::MessageStart => StreamEvent::MessageStart,
        EventName::MessageEnd => StreamEvent::MessageEnd,
        EventName::TaskDone => StreamEvent::TaskDone,
        EventName::TaskInterrupted => StreamEvent::TaskInterrupted,
        EventName::MessageChunk => StreamEvent::MessageChunk(payload(name, data)?),
        EventName::ToolExecuted => StreamEvent::ToolExecuted(payload(name, data)?),
        EventName::ToolRequireUserResponse => {
            StreamEvent::ToolRequireUserResponse(payload(name, data)?)
        }
        EventName::ToolRequirePermission => {
            StreamEvent::ToolRequirePermission(payload(name, data)?)
        }
        EventName::Error => StreamEvent::Error(payload(name, data)?),
    };

    Ok(Some(decoded))
}

/// Decode an already framed server-sent event
pub fn decode_frame(frame: &SseFrame) -> Result<Option<StreamEvent>, DecodeError> {
    decode_event(&frame.event, &frame.data)
}

fn payload<T: DeserializeOwned>(event: EventName, data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|source| DecodeError { event, source })
}
