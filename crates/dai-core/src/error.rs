//! Core error types for task runs.

use dai_api_contract::ApiContractError;
use dai_client_api::ClientApiError;

use crate::machine::TaskState;

/// Core error type for all session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a run is already in progress (state: {state})")]
    Busy { state: TaskState },

    #[error("API error: {0}")]
    Api(#[from] ClientApiError),

    #[error("Invalid request: {0}")]
    Contract(#[from] ApiContractError),
}

pub type Result<T> = std::result::Result<T, Error>;
