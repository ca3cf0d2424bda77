//! Validation helpers for API contract types

use crate::error::ApiContractError;
use crate::types::*;
use validator::Validate;

/// Validate a task creation request
pub fn validate_task_create(request: &TaskCreate) -> Result<(), ApiContractError> {
    request.validate()?;
    Ok(())
}

/// Validate a message a client is about to send with a resume call.
///
/// Clients only ever send user input or tool results; assistant and system
/// entries are produced by the server.
pub fn validate_outbound_message(message: &Message) -> Result<(), ApiContractError> {
    match message {
        Message::User(user) if user.content.trim().is_empty() => Err(
            ApiContractError::InvalidOutbound("user message is empty".to_string()),
        ),
        Message::User(_) => Ok(()),
        Message::Tool(tool) if tool.id.is_empty() => Err(ApiContractError::InvalidOutbound(
            "tool message has no id".to_string(),
        )),
        Message::Tool(_) => Ok(()),
        other => Err(ApiContractError::InvalidOutbound(format!(
            "{} messages cannot be sent by a client",
            other.role()
        ))),
    }
}

/// Validate every message in an outbound payload
pub fn validate_outbound(outbound: &Outbound) -> Result<(), ApiContractError> {
    match outbound {
        Outbound::One(message) => validate_outbound_message(message),
        Outbound::Many(messages) if messages.is_empty() => Err(
            ApiContractError::InvalidOutbound("empty message batch".to_string()),
        ),
        Outbound::Many(messages) => messages.iter().try_for_each(validate_outbound_message),
    }
}
