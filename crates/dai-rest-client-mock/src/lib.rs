//! Scripted mock of the Dai task API
//!
//! Streaming calls pop the next queued script: a fixed list of frames, a
//! rejection, or a channel the test feeds frame by frame. Every call is
//! recorded so tests can assert on what the client sent.

pub mod frames;

use async_trait::async_trait;
use dai_api_contract::*;
use dai_client_api::{ClientApiError, ClientApiResult, FrameStream, TaskApi};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A call received by [`MockTaskApi`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    ListTasks { workspace_id: i64, page: u32, per_page: u32 },
    FetchTask(TaskId),
    CreateTask(TaskCreate),
    PauseTask(TaskId),
    DeleteTask(TaskId),
    Resume {
        task_id: TaskId,
        message: Option<Outbound>,
    },
    AnswerTool {
        task_id: TaskId,
        tool_call_id: String,
        answer: serde_json::Value,
    },
}

enum StreamScript {
    Items(Vec<ClientApiResult<SseFrame>>),
    Channel(mpsc::UnboundedReceiver<ClientApiResult<SseFrame>>),
    Reject(ClientApiError),
}

/// Test-side end of a channel-driven stream
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<ClientApiResult<SseFrame>>,
}

impl FrameSender {
    /// Deliver a frame; returns false once the client dropped the stream
    pub fn send(&self, frame: SseFrame) -> bool {
        self.tx.send(Ok(frame)).is_ok()
    }

    /// Break the connection with a transport error
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(Err(ClientApiError::Transport(message.into())))
            .is_ok()
    }

    /// True once the client side of the stream has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
pub struct MockTaskApi {
    tasks: Mutex<HashMap<TaskId, Task>>,
    scripts: Mutex<VecDeque<StreamScript>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(self, task: Task) -> Self {
        self.insert_task(task);
        self
    }

    pub fn insert_task(&self, task: Task) {
        lock(&self.tasks).insert(task.id, task);
    }

    /// Queue a stream that yields `frames` and then ends
    pub fn push_frames(&self, frames: Vec<SseFrame>) {
        self.push_items(frames.into_iter().map(Ok).collect());
    }

    /// Queue a stream that yields `items`, errors included, and then ends
    pub fn push_items(&self, items: Vec<ClientApiResult<SseFrame>>) {
        lock(&self.scripts).push_back(StreamScript::Items(items));
    }

    /// Queue a rejected stream, as for a non-2xx response
    pub fn push_rejection(&self, error: ClientApiError) {
        lock(&self.scripts).push_back(StreamScript::Reject(error));
    }

    /// Queue a stream fed by the returned sender
    pub fn push_channel(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.scripts).push_back(StreamScript::Channel(rx));
        FrameSender { tx }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: RecordedCall) {
        lock(&self.calls).push(call);
    }

    fn next_stream(&self) -> ClientApiResult<FrameStream> {
        let script = lock(&self.scripts).pop_front();
        match script {
            Some(StreamScript::Items(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(StreamScript::Channel(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(StreamScript::Reject(error)) => Err(error),
            None => Err(ClientApiError::Unexpected(
                "no scripted stream queued".to_string(),
            )),
        }
    }

    fn task(&self, task_id: TaskId) -> ClientApiResult<Task> {
        lock(&self.tasks)
            .get(&task_id)
            .cloned()
            .ok_or_else(|| ClientApiError::Server(format!("task {} not found", task_id)))
    }
}

#[async_trait]
impl TaskApi for MockTaskApi {
    async fn list_tasks(
        &self,
        workspace_id: i64,
        page: u32,
        per_page: u32,
    ) -> ClientApiResult<TaskPage> {
        self.record(RecordedCall::ListTasks {
            workspace_id,
            page,
            per_page,
        });

        let mut items: Vec<Task> = lock(&self.tasks)
            .values()
            .filter(|task| task.workspace_id == workspace_id)
            .cloned()
            .collect();
        items.sort_by_key(|task| task.id);

        let total = items.len() as u64;
        let per_page = per_page.max(1);
        let total_pages = (items.len() as u32).div_ceil(per_page);
        let start = (page.saturating_sub(1) * per_page) as usize;
        let items = items
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect();

        Ok(TaskPage {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    async fn fetch_task(&self, task_id: TaskId) -> ClientApiResult<Task> {
        self.record(RecordedCall::FetchTask(task_id));
        self.task(task_id)
    }

    async fn create_task(&self, request: &TaskCreate) -> ClientApiResult<Task> {
        self.record(RecordedCall::CreateTask(request.clone()));

        let mut tasks = lock(&self.tasks);
        let id = tasks.keys().max().copied().unwrap_or(0) + 1;
        let task = Task {
            id,
            title: request.title.clone(),
            task_type: request.task_type,
            agent_id: Some(request.agent_id),
            workspace_id: request.workspace_id,
            messages: request.messages.clone(),
        };
        tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn pause_task(&self, task_id: TaskId) -> ClientApiResult<()> {
        self.record(RecordedCall::PauseTask(task_id));
        self.task(task_id).map(|_| ())
    }

    async fn delete_task(&self, task_id: TaskId) -> ClientApiResult<()> {
        self.record(RecordedCall::DeleteTask(task_id));
        lock(&self.tasks)
            .remove(&task_id)
            .map(|_| ())
            .ok_or_else(|| ClientApiError::Server(format!("task {} not found", task_id)))
    }

    async fn resume_task(
        &self,
        task_id: TaskId,
        message: Option<&Outbound>,
    ) -> ClientApiResult<FrameStream> {
        self.record(RecordedCall::Resume {
            task_id,
            message: message.cloned(),
        });
        self.next_stream()
    }

    async fn answer_tool(
        &self,
        task_id: TaskId,
        tool_call_id: &str,
        answer: &serde_json::Value,
    ) -> ClientApiResult<FrameStream> {
        self.record(RecordedCall::AnswerTool {
            task_id,
            tool_call_id: tool_call_id.to_string(),
            answer: answer.clone(),
        });
        self.next_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: TaskId, workspace_id: i64) -> Task {
        Task {
            id,
            title: format!("task {}", id),
            task_type: TaskType::Agent,
            agent_id: Some(1),
            workspace_id,
            messages: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let api = MockTaskApi::new();
        api.push_frames(vec![frames::task_done()]);
        api.push_rejection(ClientApiError::Server("busy".into()));

        let first: Vec<_> = api.resume_task(1, None).await.unwrap().collect().await;
        assert_eq!(first, vec![Ok(frames::task_done())]);

        assert_eq!(
            api.resume_task(1, None).await.err(),
            Some(ClientApiError::Server("busy".into()))
        );
        assert!(matches!(
            api.resume_task(1, None).await.err(),
            Some(ClientApiError::Unexpected(_))
        ));
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_channel_reports_closed_after_drop() {
        let api = MockTaskApi::new();
        let sender = api.push_channel();
        let stream = api.answer_tool(2, "c1", &serde_json::json!(true)).await.unwrap();

        assert!(sender.send(frames::message_start()));
        drop(stream);
        assert!(sender.is_closed());
        assert!(!sender.send(frames::task_done()));
    }

    #[tokio::test]
    async fn test_list_tasks_pages_by_workspace() {
        let api = MockTaskApi::new()
            .with_task(task(1, 10))
            .with_task(task(2, 10))
            .with_task(task(3, 20))
            .with_task(task(4, 10));

        let page = api.list_tasks(10, 2, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.iter().map(|t| t.id).collect::<Vec<_>>(), vec![4]);
    }
}
