//! Client-side run machinery for Dai tasks.
//!
//! This crate rebuilds a task transcript from the event stream of a task run:
//! it accumulates tool-call fragments, tracks the idle/waiting/running state
//! of the run, owns the single live stream of a task and decides when a task
//! loaded from storage should be offered a continuation.

pub mod accumulator;
pub mod continuation;
pub mod error;
pub mod machine;
pub mod session;
pub mod stream;

/// Core result type used throughout the crate.
pub use error::{Error, Result};

/// Per-turn tool call reconstruction.
pub use accumulator::ToolCallAccumulator;

/// Detection of tasks left mid-run.
pub use continuation::{continuation_offer, needs_continuation, FINISH_TASK_TOOL};

/// Run state machine.
pub use machine::{Outcome, PendingAction, RunEnd, RunMachine, TaskState};

/// Consumer-facing task context.
pub use session::{NoopObserver, RunHandle, RunObserver, TaskSession};

/// Stream ownership and cancellation.
pub use stream::{EventSink, StreamClient, StreamHandle, StreamRequest};
