//! REST API client for the Dai task service
//!
//! This crate provides the HTTP client for the task endpoints, including the
//! two streaming calls (resume and tool answer) whose `text/event-stream`
//! bodies carry a task run's events.

pub mod client;
pub mod config;
pub mod error;
pub mod sse;

pub use client::*;
pub use config::*;
pub use error::*;

use async_trait::async_trait;
use dai_api_contract::*;
use dai_client_api::{ClientApiError, ClientApiResult, FrameStream, TaskApi};
use futures::StreamExt;

fn into_frames(stream: sse::TaskEventStream) -> FrameStream {
    stream
        .map(|frame| frame.map_err(ClientApiError::from))
        .boxed()
}

#[async_trait]
impl TaskApi for client::RestClient {
    async fn list_tasks(
        &self,
        workspace_id: i64,
        page: u32,
        per_page: u32,
    ) -> ClientApiResult<TaskPage> {
        Ok(self.list_tasks(workspace_id, page, per_page).await?)
    }

    async fn fetch_task(&self, task_id: TaskId) -> ClientApiResult<Task> {
        Ok(self.fetch_task(task_id).await?)
    }

    async fn create_task(&self, request: &TaskCreate) -> ClientApiResult<Task> {
        Ok(self.create_task(request).await?)
    }

    async fn pause_task(&self, task_id: TaskId) -> ClientApiResult<()> {
        Ok(self.pause_task(task_id).await?)
    }

    async fn delete_task(&self, task_id: TaskId) -> ClientApiResult<()> {
        Ok(self.delete_task(task_id).await?)
    }

    async fn resume_task(
        &self,
        task_id: TaskId,
        message: Option<&Outbound>,
    ) -> ClientApiResult<FrameStream> {
        let stream = self.resume_task(task_id, message).await?;
        Ok(into_frames(stream))
    }

    async fn answer_tool(
        &self,
        task_id: TaskId,
        tool_call_id: &str,
        answer: &serde_json::Value,
    ) -> ClientApiResult<FrameStream> {
        let stream = self.answer_tool(task_id, tool_call_id, answer).await?;
        Ok(into_frames(stream))
    }
}
