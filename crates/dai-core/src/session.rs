//! Task session: the transcript, state machine and stream of one open task.
//!
//! A [`TaskSession`] is the single writer of its task's transcript. Stream
//! events are applied by the session's pump; user actions (submit, continue,
//! answer) are only accepted while the session is idle. Consumers watch a
//! run through a [`RunObserver`] and may read a snapshot at any time.

use dai_api_contract::validation::validate_outbound_message;
use dai_api_contract::{DecodeError, Message, StreamEvent, Task, TaskId};
use dai_client_api::TaskApi;
use serde_json::{json, Value};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use crate::continuation::needs_continuation;
use crate::error::Result;
use crate::machine::{Outcome, PendingAction, RunEnd, RunMachine, TaskState};
use crate::stream::{EventSink, StreamClient, StreamHandle, StreamRequest};

/// Callbacks describing the progress of a run.
///
/// Methods are called from the session's stream task while the session is
/// locked, so implementations must not call back into the session. After
/// [`TaskSession::cancel`] returns nothing is reported for that run.
pub trait RunObserver: Send + 'static {
    fn on_state(&mut self, _state: TaskState) {}

    /// The transcript changed
    fn on_transcript(&mut self, _messages: &[Message]) {}

    /// The server waits for an answer or an approval
    fn on_pending(&mut self, _action: &PendingAction) {}

    /// A frame was dropped because it could not be decoded
    fn on_decode_error(&mut self, _error: &DecodeError) {}

    /// The run failed; reported once per failed run
    fn on_error(&mut self, _message: &str) {}

    fn on_finished(&mut self, _end: &RunEnd) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

struct Inner {
    task: Task,
    machine: RunMachine,
    /// Counts runs started on this session
    run: u64,
    continuation_offered: bool,
    observer: Box<dyn RunObserver>,
}

impl Inner {
    fn report(&mut self, before: TaskState, outcome: Outcome) -> ControlFlow<()> {
        match outcome {
            Outcome::Ended(end) => {
                self.end_run(end);
                return ControlFlow::Break(());
            }
            Outcome::Updated => self.observer.on_transcript(&self.task.messages),
            Outcome::AwaitingUser(action) => self.observer.on_pending(&action),
            Outcome::Unchanged => {}
        }

        let after = self.machine.state();
        if after != before {
            self.observer.on_state(after);
        }
        ControlFlow::Continue(())
    }

    fn end_run(&mut self, end: RunEnd) {
        self.continuation_offered = matches!(end, RunEnd::Interrupted | RunEnd::Failed(_))
            || needs_continuation(&self.task.messages);
        info!(task_id = self.task.id, ?end, "task run ended");

        if let RunEnd::Failed(message) = &end {
            self.observer.on_error(message);
        }
        self.observer.on_state(TaskState::Idle);
        self.observer.on_finished(&end);
    }

    /// Enter `waiting` for a new run and return its number
    fn begin(&mut self) -> Result<u64> {
        self.machine.begin()?;
        self.run += 1;
        self.continuation_offered = false;
        self.observer.on_state(TaskState::Waiting);
        Ok(self.run)
    }

    /// Return to idle after the stream was cancelled, without telling the
    /// observer
    fn cancel_run(&mut self) {
        if let Outcome::Ended(end) = self.machine.finish(RunEnd::Cancelled) {
            self.continuation_offered = needs_continuation(&self.task.messages);
            info!(task_id = self.task.id, ?end, "task run cancelled");
        }
    }
}

/// Sink that applies stream events to the session
struct SessionSink {
    inner: Arc<Mutex<Inner>>,
}

impl SessionSink {
    fn finish(&mut self, end: RunEnd) {
        let mut inner = lock(&self.inner);
        let before = inner.machine.state();
        let outcome = inner.machine.finish(end);
        let _ = inner.report(before, outcome);
    }
}

impl EventSink for SessionSink {
    fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let before = inner.machine.state();
        let outcome = inner.machine.apply(&mut inner.task.messages, event);
        inner.report(before, outcome)
    }

    fn on_decode_error(&mut self, error: &DecodeError) {
        lock(&self.inner).observer.on_decode_error(error);
    }

    fn on_failure(&mut self, message: String) {
        self.finish(RunEnd::Failed(message));
    }

    fn on_closed(&mut self) {
        self.finish(RunEnd::Closed);
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle of one run started on a [`TaskSession`]
#[derive(Debug, Clone)]
pub struct RunHandle {
    run: u64,
    stream: StreamHandle,
    session: Weak<Mutex<Inner>>,
}

impl RunHandle {
    pub fn task_id(&self) -> TaskId {
        self.stream.task_id()
    }

    /// Stop this run.
    ///
    /// Same guarantees as [`TaskSession::cancel`] while this is still the
    /// session's latest run. Once a later run has started only the stream
    /// of this one is affected.
    pub fn cancel(&self) {
        self.stream.cancel();
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let mut inner = lock(&session);
        if inner.run == self.run {
            inner.cancel_run();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stream.is_cancelled()
    }

    /// True once the run's stream task has exited
    pub fn is_finished(&self) -> bool {
        self.stream.is_finished()
    }
}

/// One open task
pub struct TaskSession {
    task_id: TaskId,
    inner: Arc<Mutex<Inner>>,
    stream: StreamClient,
}

impl TaskSession {
    /// Fetch a task and open a session on it
    pub async fn open(
        api: Arc<dyn TaskApi>,
        task_id: TaskId,
        observer: impl RunObserver,
    ) -> Result<Self> {
        let task = api.fetch_task(task_id).await?;
        Ok(Self::from_task(api, task, observer))
    }

    /// Open a session on an already fetched task
    pub fn from_task(api: Arc<dyn TaskApi>, task: Task, observer: impl RunObserver) -> Self {
        let continuation_offered = needs_continuation(&task.messages);
        debug!(
            task_id = task.id,
            messages = task.messages.len(),
            continuation_offered,
            "task session opened"
        );

        Self {
            task_id: task.id,
            inner: Arc::new(Mutex::new(Inner {
                task,
                machine: RunMachine::new(),
                run: 0,
                continuation_offered,
                observer: Box::new(observer),
            })),
            stream: StreamClient::new(api),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn state(&self) -> TaskState {
        lock(&self.inner).machine.state()
    }

    /// Snapshot of the transcript
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).task.messages.clone()
    }

    /// Snapshot of the whole task
    pub fn task(&self) -> Task {
        lock(&self.inner).task.clone()
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        lock(&self.inner).machine.pending().cloned()
    }

    /// Whether a "continue" action should be offered
    pub fn continuation_offered(&self) -> bool {
        let inner = lock(&self.inner);
        inner.machine.is_idle() && inner.continuation_offered
    }

    /// Send a new user message and stream the reply
    pub fn submit(&mut self, content: impl Into<String>) -> Result<RunHandle> {
        let message = Message::user(content);
        validate_outbound_message(&message)?;

        let run = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let run = inner.begin()?;
            inner.task.messages.push(message.clone());
            inner.observer.on_transcript(&inner.task.messages);
            run
        };

        Ok(self.start(run, StreamRequest::Resume(Some(message.into()))))
    }

    /// Resume the task without new input
    pub fn continue_run(&mut self) -> Result<RunHandle> {
        let run = lock(&self.inner).begin()?;
        Ok(self.start(run, StreamRequest::Resume(None)))
    }

    /// Answer a tool call the server asked the user about.
    ///
    /// The answer is recorded as the tool's result before the run resumes.
    pub fn answer_tool(&mut self, tool_call_id: &str, answer: Value) -> Result<RunHandle> {
        let run = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            let run = inner.begin()?;

            let tool = inner.task.messages.iter_mut().rev().find_map(|message| match message {
                Message::Tool(tool) if tool.id == tool_call_id => Some(tool),
                _ => None,
            });
            match tool {
                Some(tool) => {
                    tool.result = Some(answer.clone());
                    inner.observer.on_transcript(&inner.task.messages);
                }
                None => warn!(task_id = self.task_id, tool_call_id, "answering unknown tool call"),
            }
            run
        };

        Ok(self.start(run, StreamRequest::ToolAnswer {
            tool_call_id: tool_call_id.to_string(),
            answer,
        }))
    }

    /// Approve or deny a tool call awaiting permission
    pub fn approve_tool(&mut self, tool_call_id: &str, approved: bool) -> Result<RunHandle> {
        let run = lock(&self.inner).begin()?;
        Ok(self.start(run, StreamRequest::ToolAnswer {
            tool_call_id: tool_call_id.to_string(),
            answer: json!({ "approved": approved }),
        }))
    }

    /// Stop the current run.
    ///
    /// The session is idle when this returns and the observer hears nothing
    /// more about the run.
    pub fn cancel(&mut self) {
        self.stream.cancel();
        lock(&self.inner).cancel_run();
    }

    fn start(&mut self, run: u64, request: StreamRequest) -> RunHandle {
        let sink = SessionSink {
            inner: self.inner.clone(),
        };
        RunHandle {
            run,
            stream: self.stream.start(self.task_id, request, sink),
            session: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for TaskSession {
    fn drop(&mut self) {
        self.stream.cancel();
    }
}
