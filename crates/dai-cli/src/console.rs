//! Terminal output for a streaming task run

use dai_api_contract::Message;
use dai_core::{PendingAction, RunEnd, RunObserver};
use std::collections::HashSet;
use std::io::Write;
use tokio::sync::mpsc;

use crate::render::tool_line;

/// Writes assistant output to stdout as it streams in and reports the end
/// of the run over a channel
pub struct ConsoleObserver<W: Write + Send + 'static> {
    out: W,
    skip: usize,
    /// First transcript index not fully printed
    next: usize,
    /// Bytes of that message's content already printed
    printed: usize,
    announced: HashSet<String>,
    resolved: HashSet<String>,
    finished: mpsc::UnboundedSender<RunEnd>,
}

impl ConsoleObserver<std::io::Stdout> {
    pub fn stdout(skip: usize, finished: mpsc::UnboundedSender<RunEnd>) -> Self {
        Self::new(std::io::stdout(), skip, finished)
    }
}

impl<W: Write + Send + 'static> ConsoleObserver<W> {
    /// Observer that ignores the first `skip` messages of the transcript
    pub fn new(out: W, skip: usize, finished: mpsc::UnboundedSender<RunEnd>) -> Self {
        Self {
            out,
            skip,
            next: skip,
            printed: 0,
            announced: HashSet::new(),
            resolved: HashSet::new(),
            finished,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_tools(&mut self, messages: &[Message]) {
        let start = self.skip.min(messages.len());
        for message in &messages[start..] {
            let Message::Tool(tool) = message else {
                continue;
            };
            if self.announced.insert(tool.id.clone()) {
                let _ = writeln!(self.out, "\n-> {}", tool_line(tool));
            } else if tool.is_resolved() && !self.resolved.contains(&tool.id) {
                let _ = writeln!(self.out, "<- {}", tool_line(tool));
            }
            if tool.is_resolved() {
                self.resolved.insert(tool.id.clone());
            }
        }
    }

    fn print_text(&mut self, messages: &[Message]) {
        while self.next < messages.len() {
            let is_last = self.next + 1 == messages.len();
            if let Message::Assistant(assistant) = &messages[self.next] {
                let delta = assistant.content.get(self.printed..).unwrap_or_default();
                let _ = write!(self.out, "{}", delta);
                self.printed = assistant.content.len();
            }
            if is_last {
                break;
            }
            self.next += 1;
            self.printed = 0;
        }
    }
}

impl<W: Write + Send + 'static> RunObserver for ConsoleObserver<W> {
    fn on_transcript(&mut self, messages: &[Message]) {
        self.print_text(messages);
        self.print_tools(messages);
        let _ = self.out.flush();
    }

    fn on_pending(&mut self, action: &PendingAction) {
        let _ = match action {
            PendingAction::UserResponse { tool_name } => {
                writeln!(self.out, "\n? {} is waiting for your answer", tool_name)
            }
            PendingAction::Permission { tool_call_id } => {
                writeln!(self.out, "\n? tool call {} needs approval", tool_call_id)
            }
        };
    }

    fn on_finished(&mut self, end: &RunEnd) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
        let _ = self.finished.send(end.clone());
    }
}
