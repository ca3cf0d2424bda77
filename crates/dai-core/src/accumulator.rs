//! Tool call reconstruction from streamed fragments.
//!
//! The server streams each tool call as a series of chunks sharing an
//! `index`. Ids and names usually arrive once, arguments arrive spread over
//! many frames. [`ToolCallAccumulator`] merges them for the duration of one
//! assistant turn and hands out complete calls when the turn ends.

use dai_api_contract::{ToolCall, ToolCallChunk, ToolMessage};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Per-turn buffer of partial tool calls keyed by call index
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one chunk into the buffer.
    ///
    /// Arguments are appended in arrival order. An id or name is only
    /// replaced by a chunk that actually carries one.
    pub fn observe(&mut self, chunk: ToolCallChunk) {
        let ToolCallChunk {
            index,
            id,
            name,
            arguments,
        } = chunk;
        let id = id.filter(|id| !id.is_empty());
        let name = name.filter(|name| !name.is_empty());

        let call = self.calls.entry(index).or_default();
        call.arguments.push_str(&arguments);
        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name = name;
        }
    }

    /// Take every buffered call in ascending index order, leaving the buffer
    /// empty
    pub fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Parse accumulated argument text into a JSON object.
///
/// Anything that is not a JSON object yields an empty object so the tool
/// message can still be created.
pub fn parse_arguments(call: &ToolCall) -> Map<String, Value> {
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(Value::Object(arguments)) => arguments,
        Ok(other) => {
            warn!(
                tool_call_id = %call.id,
                "tool arguments are not an object: {}", other
            );
            Map::new()
        }
        Err(e) => {
            warn!(tool_call_id = %call.id, "failed to parse tool arguments: {}", e);
            Map::new()
        }
    }
}

/// Build the unresolved tool message for a completed call
pub fn tool_message(call: &ToolCall) -> ToolMessage {
    ToolMessage {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: parse_arguments(call),
        result: None,
        error: None,
    }
}
