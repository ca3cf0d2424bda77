use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use dai_api_contract::TaskId;
use dai_client_api::TaskApi;
use dai_core::{needs_continuation, RunEnd, RunHandle, TaskSession};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::console::ConsoleObserver;
use crate::render::{message_lines, page_lines, task_header};

/// Task-related commands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// Print a task's transcript
    Show(TaskShowArgs),
    /// List the tasks of a workspace
    List(TaskListArgs),
    /// Send a message to a task and stream the reply
    Run(TaskRunArgs),
    /// Resume a task that was left mid-run
    Continue(TaskIdArgs),
    /// Answer a question the task asked
    Answer(TaskAnswerArgs),
    /// Approve or deny a tool call awaiting permission
    Approve(TaskApproveArgs),
    /// Ask the server to pause a running task
    Pause(TaskIdArgs),
}

#[derive(Args)]
pub struct TaskIdArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: TaskId,
}

#[derive(Args)]
pub struct TaskShowArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: TaskId,

    /// Print the task as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct TaskListArgs {
    /// Workspace to list tasks from
    #[arg(long = "workspace", value_name = "ID")]
    pub workspace_id: i64,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long = "per-page", default_value_t = 20)]
    pub per_page: u32,
}

#[derive(Args)]
pub struct TaskRunArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: TaskId,

    /// Message to send
    #[arg(value_name = "TEXT")]
    pub text: String,
}

#[derive(Args)]
pub struct TaskAnswerArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: TaskId,

    #[arg(value_name = "TOOL_CALL_ID")]
    pub tool_call_id: String,

    /// Answer, sent as JSON when it parses as JSON and as a string otherwise
    #[arg(value_name = "ANSWER")]
    pub answer: String,
}

#[derive(Args)]
pub struct TaskApproveArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: TaskId,

    #[arg(value_name = "TOOL_CALL_ID")]
    pub tool_call_id: String,

    /// Deny the tool call instead of approving it
    #[arg(long)]
    pub deny: bool,
}

impl TaskCommands {
    /// Execute the task command
    pub async fn run(self, api: Arc<dyn TaskApi>) -> Result<()> {
        match self {
            TaskCommands::Show(args) => args.run(api).await,
            TaskCommands::List(args) => args.run(api).await,
            TaskCommands::Run(args) => {
                stream_run(api, args.task_id, |session| session.submit(args.text)).await
            }
            TaskCommands::Continue(args) => {
                stream_run(api, args.task_id, |session| session.continue_run()).await
            }
            TaskCommands::Answer(args) => {
                let answer = parse_answer(&args.answer);
                stream_run(api, args.task_id, |session| {
                    session.answer_tool(&args.tool_call_id, answer)
                })
                .await
            }
            TaskCommands::Approve(args) => {
                let approved = !args.deny;
                stream_run(api, args.task_id, |session| {
                    session.approve_tool(&args.tool_call_id, approved)
                })
                .await
            }
            TaskCommands::Pause(args) => {
                api.pause_task(args.task_id)
                    .await
                    .with_context(|| format!("Failed to pause task {}", args.task_id))?;
                println!("Pause requested for task {}", args.task_id);
                Ok(())
            }
        }
    }
}

impl TaskShowArgs {
    async fn run(self, api: Arc<dyn TaskApi>) -> Result<()> {
        let task = api
            .fetch_task(self.task_id)
            .await
            .with_context(|| format!("Failed to fetch task {}", self.task_id))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&task)?);
            return Ok(());
        }

        println!("{}", task_header(&task));
        for message in &task.messages {
            for line in message_lines(message) {
                println!("  {}", line);
            }
        }
        if needs_continuation(&task.messages) {
            println!(
                "This task was left mid-run; resume it with `dai task continue {}`",
                task.id
            );
        }
        Ok(())
    }
}

impl TaskListArgs {
    async fn run(self, api: Arc<dyn TaskApi>) -> Result<()> {
        let page = api
            .list_tasks(self.workspace_id, self.page, self.per_page)
            .await
            .with_context(|| format!("Failed to list tasks of workspace {}", self.workspace_id))?;
        for line in page_lines(&page) {
            println!("{}", line);
        }
        Ok(())
    }
}

/// Interpret a command-line answer
pub fn parse_answer(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Open a session on `task_id`, start a run with `action` and print it until
/// it ends or Ctrl-C cancels it
async fn stream_run<F>(api: Arc<dyn TaskApi>, task_id: TaskId, action: F) -> Result<()>
where
    F: FnOnce(&mut TaskSession) -> dai_core::Result<RunHandle>,
{
    let task = api
        .fetch_task(task_id)
        .await
        .with_context(|| format!("Failed to fetch task {}", task_id))?;

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let observer = ConsoleObserver::stdout(task.messages.len(), finished_tx);
    let mut session = TaskSession::from_task(api, task, observer);

    action(&mut session)?;

    let end = tokio::select! {
        end = finished_rx.recv() => end.unwrap_or(RunEnd::Closed),
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            RunEnd::Cancelled
        }
    };
    debug!(task_id, ?end, "run ended");

    if let Some(action) = session.pending_action() {
        eprintln!("Task is waiting on {:?}", action);
    } else if end != RunEnd::Done && session.continuation_offered() {
        eprintln!(
            "Task stopped before finishing; resume it with `dai task continue {}`",
            task_id
        );
    }
    run_result(end)
}

/// Exit status of a finished run. The console observer does not print
/// failures, so this is where their message surfaces.
fn run_result(end: RunEnd) -> Result<()> {
    match end {
        RunEnd::Failed(message) => anyhow::bail!("Task run failed: {}", message),
        RunEnd::Done | RunEnd::Interrupted | RunEnd::Closed | RunEnd::Cancelled => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("true"), json!(true));
        assert_eq!(parse_answer(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_answer("blue"), json!("blue"));
        assert_eq!(parse_answer("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn test_only_failed_runs_are_errors() {
        let error = run_result(RunEnd::Failed("rate limited".into())).unwrap_err();
        assert_eq!(error.to_string(), "Task run failed: rate limited");

        assert!(run_result(RunEnd::Done).is_ok());
        assert!(run_result(RunEnd::Interrupted).is_ok());
        assert!(run_result(RunEnd::Cancelled).is_ok());
    }
}
