//! Dai task API contract types, stream events and validation
//!
//! This crate defines the task data model, the payloads of the task
//! execution event stream and the decoder that turns raw frames into typed
//! events. These types are shared by the REST client, the mock client and
//! the core run state machine.

pub mod error;
pub mod events;
pub mod types;
pub mod validation;

pub use error::*;
pub use events::*;
pub use types::*;
