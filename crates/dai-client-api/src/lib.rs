//! Client API trait for the Dai task service
//!
//! The core run machinery talks to the server only through [`TaskApi`]. The
//! two streaming calls return the raw frame sequence of a task run; decoding
//! and state tracking happen on the caller's side.

use async_trait::async_trait;
use dai_api_contract::*;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientApiError {
    /// The server answered with a non-2xx status
    #[error("server error: {0}")]
    Server(String),
    /// The connection could not be opened or broke while streaming
    #[error("transport error: {0}")]
    Transport(String),
    /// The request was rejected before it was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected: {0}")]
    Unexpected(String),
}

pub type ClientApiResult<T> = Result<T, ClientApiError>;

/// Raw frames of one task run, in server emission order
pub type FrameStream = BoxStream<'static, ClientApiResult<SseFrame>>;

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(
        &self,
        workspace_id: i64,
        page: u32,
        per_page: u32,
    ) -> ClientApiResult<TaskPage>;

    async fn fetch_task(&self, task_id: TaskId) -> ClientApiResult<Task>;

    async fn create_task(&self, request: &TaskCreate) -> ClientApiResult<Task>;

    async fn pause_task(&self, task_id: TaskId) -> ClientApiResult<()>;

    async fn delete_task(&self, task_id: TaskId) -> ClientApiResult<()>;

    /// Resume or continue a task, optionally carrying new input.
    ///
    /// `None` resumes with no new input; the server keeps the context.
    async fn resume_task(
        &self,
        task_id: TaskId,
        message: Option<&Outbound>,
    ) -> ClientApiResult<FrameStream>;

    /// Supply the answer for a tool call the server is blocked on
    async fn answer_tool(
        &self,
        task_id: TaskId,
        tool_call_id: &str,
        answer: &serde_json::Value,
    ) -> ClientApiResult<FrameStream>;
}
