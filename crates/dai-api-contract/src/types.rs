//! API contract types for the Dai task service

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// Server-assigned task identifier
pub type TaskId = i64;

/// Kind of run a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Agent,
    Orchestration,
}

/// A task and its message transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub agent_id: Option<i64>,
    pub workspace_id: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Task creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TaskCreate {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub agent_id: i64,
    pub workspace_id: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One page of tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// A transcript entry, tagged by `role`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
    System(SystemMessage),
}

impl Message {
    /// Build a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolMessage> {
        match self {
            Self::Tool(message) => Some(message),
            _ => None,
        }
    }

    /// Role name as it appears on the wire
    pub fn role(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::Tool(_) => "tool",
            Self::System(_) => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

/// Assistant turn; `content` and `reasoning_content` grow while streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub audio: Option<AudioResponse>,
    #[serde(default)]
    pub images: Option<Vec<ImageUrl>>,
}

/// One tool invocation, created after the owning assistant turn ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolMessage {
    /// A tool call is resolved once it carries a result or an error
    pub fn is_resolved(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// System entries are carried through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A completed tool call as requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text, exactly as concatenated from the stream
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioResponse {
    pub id: String,
    pub data: String,
    pub expires_at: i64,
    pub transcript: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

/// Partial tool call fragment; chunks sharing an `index` belong together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// Payload of `MESSAGE_CHUNK`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageChunk {
    Text { content: String },
    Reasoning { content: String },
    ToolCall { data: ToolCallChunk },
    /// Any other chunk kind; carries nothing the transcript can use
    #[serde(other)]
    Unknown,
}

/// Payload of `TOOL_EXECUTED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecuted {
    pub tool_call_id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `TOOL_REQUIRE_USER_RESPONSE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequireUserResponse {
    pub tool_name: String,
}

/// Payload of `TOOL_REQUIRE_PERMISSION`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequirePermission {
    pub tool_call_id: String,
}

/// Payload of `ERROR`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Outbound message(s) carried by a resume call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    One(Message),
    Many(Vec<Message>),
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Self::One(message)
    }
}

impl From<Vec<Message>> for Outbound {
    fn from(messages: Vec<Message>) -> Self {
        Self::Many(messages)
    }
}

/// Body of `POST /tasks/resume/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub message: Option<Outbound>,
}

/// Body of `POST /tasks/answer/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAnswerRequest {
    pub tool_call_id: String,
    pub answer: Value,
}

/// Body of non-2xx responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// One server-sent event frame before decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}
