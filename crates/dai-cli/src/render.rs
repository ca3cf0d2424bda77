//! Plain-text rendering of tasks and transcripts

use dai_api_contract::{Message, Task, TaskPage, ToolMessage};
use serde_json::Value;

const PREVIEW_LIMIT: usize = 200;

/// Shorten `text` to at most `limit` characters
fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{}...", cut)
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One-line summary of a tool call, including its outcome
pub fn tool_line(tool: &ToolMessage) -> String {
    let arguments = Value::Object(tool.arguments.clone()).to_string();
    let outcome = match (&tool.result, &tool.error) {
        (_, Some(error)) => format!("error: {}", error),
        (Some(result), None) => preview(&compact(result), PREVIEW_LIMIT),
        (None, None) => "pending".to_string(),
    };
    format!("{}({}) -> {}", tool.name, preview(&arguments, PREVIEW_LIMIT), outcome)
}

pub fn message_lines(message: &Message) -> Vec<String> {
    match message {
        Message::User(user) => vec![format!("user: {}", user.content)],
        Message::Assistant(assistant) => {
            let mut lines = Vec::new();
            if let Some(reasoning) = assistant.reasoning_content.as_deref() {
                if !reasoning.is_empty() {
                    lines.push(format!("assistant (reasoning): {}", reasoning));
                }
            }
            if !assistant.content.is_empty() || lines.is_empty() {
                lines.push(format!("assistant: {}", assistant.content));
            }
            lines
        }
        Message::Tool(tool) => vec![format!("tool [{}] {}", tool.id, tool_line(tool))],
        Message::System(_) => vec!["system: (hidden)".to_string()],
    }
}

pub fn task_header(task: &Task) -> String {
    let task_type = serde_json::to_value(task.task_type)
        .ok()
        .map(|v| compact(&v))
        .unwrap_or_default();
    format!("#{} {} [{}]", task.id, task.title, task_type)
}

pub fn page_lines(page: &TaskPage) -> Vec<String> {
    let mut lines: Vec<String> = page.items.iter().map(task_header).collect();
    lines.push(format!(
        "page {}/{} ({} tasks)",
        page.page, page.total_pages, page.total
    ));
    lines
}
