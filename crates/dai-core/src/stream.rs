//! Stream client: one live task-run connection at a time.
//!
//! [`StreamClient::start`] spawns a pump task that opens the streaming call,
//! decodes each frame and hands the resulting events to an [`EventSink`].
//! The returned [`StreamHandle`] cancels the run.
//!
//! Every sink callback runs under the handle's dispatch gate after checking
//! the cancellation token, and [`StreamHandle::cancel`] takes the same gate
//! after cancelling. Once `cancel` returns no callback is running and none
//! will run, even for frames the transport had already buffered.

use dai_api_contract::{decode_frame, DecodeError, Outbound, StreamEvent, TaskId};
use dai_client_api::{ClientApiError, FrameStream, TaskApi};
use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decode failures in a row after which the stream is treated as corrupt
pub const MAX_CONSECUTIVE_DECODE_FAILURES: usize = 5;

/// Which streaming call opens a run
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRequest {
    /// Resume the task, with new input or none (continuation)
    Resume(Option<Outbound>),
    /// Answer a tool call the server is waiting on
    ToolAnswer {
        tool_call_id: String,
        answer: serde_json::Value,
    },
}

/// Receiver of one run's decoded events.
///
/// Callbacks are invoked in frame order from the pump task and must not
/// block or cancel the stream that is calling them.
pub trait EventSink: Send + 'static {
    /// A decoded event. Returning `Break` closes the stream.
    fn on_event(&mut self, event: StreamEvent) -> ControlFlow<()>;

    /// A frame could not be decoded; the stream keeps going
    fn on_decode_error(&mut self, _error: &DecodeError) {}

    /// The stream could not be opened or broke; it is closed afterwards
    fn on_failure(&mut self, message: String);

    /// The server ended the stream without a terminal event
    fn on_closed(&mut self);
}

#[derive(Debug)]
struct Shared {
    task_id: TaskId,
    token: CancellationToken,
    gate: Mutex<()>,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` unless the stream was cancelled
    fn dispatch<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate();
        if self.token.is_cancelled() {
            return None;
        }
        Some(f())
    }
}

#[derive(Debug)]
struct HandleInner {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

/// Cancellation handle of one run
#[derive(Debug, Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

impl StreamHandle {
    pub fn task_id(&self) -> TaskId {
        self.inner.shared.task_id
    }

    /// Stop the run.
    ///
    /// Waits for a callback that is already executing, then aborts the
    /// connection. Idempotent.
    pub fn cancel(&self) {
        let shared = &self.inner.shared;
        if !shared.token.is_cancelled() {
            debug!(task_id = shared.task_id, "cancelling task stream");
        }
        shared.token.cancel();
        drop(shared.gate());
        self.inner.pump.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.shared.token.is_cancelled()
    }

    /// True once the pump task has exited, for whatever reason
    pub fn is_finished(&self) -> bool {
        self.inner.pump.is_finished()
    }
}

/// Owner of the single active stream of a consumer
pub struct StreamClient {
    api: Arc<dyn TaskApi>,
    current: Option<StreamHandle>,
}

impl StreamClient {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self { api, current: None }
    }

    pub fn api(&self) -> &Arc<dyn TaskApi> {
        &self.api
    }

    /// Open a run and feed its events to `sink`.
    ///
    /// A previous run started from this client is cancelled first. Must be
    /// called from within a Tokio runtime.
    pub fn start<S: EventSink>(
        &mut self,
        task_id: TaskId,
        request: StreamRequest,
        sink: S,
    ) -> StreamHandle {
        self.cancel();

        let shared = Arc::new(Shared {
            task_id,
            token: CancellationToken::new(),
            gate: Mutex::new(()),
        });
        let pump = tokio::spawn(pump(self.api.clone(), request, sink, shared.clone()));
        let handle = StreamHandle {
            inner: Arc::new(HandleInner { shared, pump }),
        };
        self.current = Some(handle.clone());
        handle
    }

    /// Cancel the active run, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.cancel();
        }
    }

    /// True while the latest run's pump is still alive
    pub fn is_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled() && !handle.is_finished())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Plain message of an API error, without the category prefix
pub fn failure_message(error: ClientApiError) -> String {
    match error {
        ClientApiError::Server(message)
        | ClientApiError::Transport(message)
        | ClientApiError::InvalidRequest(message)
        | ClientApiError::Unexpected(message) => message,
    }
}

async fn open(
    api: &dyn TaskApi,
    task_id: TaskId,
    request: &StreamRequest,
) -> Result<FrameStream, ClientApiError> {
    match request {
        StreamRequest::Resume(message) => api.resume_task(task_id, message.as_ref()).await,
        StreamRequest::ToolAnswer {
            tool_call_id,
            answer,
        } => api.answer_tool(task_id, tool_call_id, answer).await,
    }
}

async fn pump<S: EventSink>(
    api: Arc<dyn TaskApi>,
    request: StreamRequest,
    mut sink: S,
    shared: Arc<Shared>,
) {
    let task_id = shared.task_id;
    let token = shared.token.clone();

    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        opened = open(api.as_ref(), task_id, &request) => opened,
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(e) => {
            warn!(task_id, "failed to open task stream: {}", e);
            shared.dispatch(|| sink.on_failure(failure_message(e)));
            return;
        }
    };

    let mut decode_failures = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(task_id, "task stream failed: {}", e);
                shared.dispatch(|| sink.on_failure(failure_message(e)));
                return;
            }
            None => {
                debug!(task_id, "task stream closed by server");
                shared.dispatch(|| sink.on_closed());
                return;
            }
        };

        match decode_frame(&frame) {
            Ok(Some(event)) => {
                decode_failures = 0;
                let terminal = event.is_terminal();
                let flow = shared.dispatch(|| sink.on_event(event));
                match flow {
                    Some(ControlFlow::Continue(())) if !terminal => {}
                    _ => return,
                }
            }
            Ok(None) => {}
            Err(e) => {
                decode_failures += 1;
                warn!(task_id, decode_failures, "failed to decode frame: {}", e);
                shared.dispatch(|| sink.on_decode_error(&e));
                if decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                    shared.dispatch(|| {
                        sink.on_failure(format!(
                            "stream corrupted: {} consecutive undecodable frames",
                            decode_failures
                        ))
                    });
                    return;
                }
            }
        }
    }
}
