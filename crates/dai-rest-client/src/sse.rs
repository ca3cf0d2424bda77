//! Server-Sent Events (SSE) streaming support

use dai_api_contract::SseFrame;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::{RestClientError, RestClientResult};

/// Longest line accepted before the stream is treated as broken
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Incremental `text/event-stream` parser.
///
/// Bytes may be fed in arbitrary pieces; complete frames are returned as soon
/// as their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes, returning every frame they complete.
    ///
    /// Fails once a line grows past [`MAX_LINE_BYTES`] without a newline.
    pub fn feed(&mut self, bytes: &[u8]) -> RestClientResult<Vec<SseFrame>> {
        self.feed_bounded(bytes, MAX_LINE_BYTES)
    }

    fn feed_bounded(&mut self, bytes: &[u8], max_line: usize) -> RestClientResult<Vec<SseFrame>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            // Lines are split on '\n', which never occurs inside a multi-byte
            // UTF-8 sequence, so a code point is never cut in half here.
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > max_line {
            return Err(RestClientError::Sse(format!(
                "line exceeds {} bytes without a newline",
                max_line
            )));
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" | "retry" => {}
            other => trace!(field = other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Frames of one task run, read from a streaming HTTP response
pub struct TaskEventStream {
    receiver: mpsc::Receiver<RestClientResult<SseFrame>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TaskEventStream {
    /// Start reading frames from an already successful response
    pub fn from_response(response: reqwest::Response) -> Self {
        let (tx, rx) = mpsc::channel(64);

        let handle = tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        let frames = match parser.feed(&bytes) {
                            Ok(frames) => frames,
                            Err(e) => {
                                error!("SSE stream error: {}", e);
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };
                        for frame in frames {
                            trace!(event = %frame.event, "SSE frame");
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("SSE stream error: {}", e);
                        let _ = tx.send(Err(RestClientError::Sse(e.to_string()))).await;
                        return;
                    }
                }
            }
            debug!("SSE stream ended");
        });

        TaskEventStream {
            receiver: rx,
            handle,
        }
    }
}

impl Stream for TaskEventStream {
    type Item = RestClientResult<SseFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for TaskEventStream {
    fn drop(&mut self) {
        // Dropping the reader closes the underlying connection.
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_events() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed(b"event: MESSAGE_START\ndata: \n\nevent: MESSAGE_CHUNK\ndata: {\"type\":\"text\",\"content\":\"Hi\"}\n\n")
            .unwrap();
        assert_eq!(
            frames,
            vec![
                SseFrame::new("MESSAGE_START", ""),
                SseFrame::new("MESSAGE_CHUNK", r#"{"type":"text","content":"Hi"}"#),
            ]
        );
    }

    #[test]
    fn test_parse_event_without_data() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"event: TASK_DONE\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::new("TASK_DONE", "")]);
    }

    #[test]
    fn test_parse_frames_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: MESSAGE_CH").unwrap().is_empty());
        assert!(parser.feed(b"UNK\r\ndata: {\"type\":\"text\",").unwrap().is_empty());
        assert!(parser.feed(b"\"content\":\"\xc3").unwrap().is_empty());
        let frames = parser.feed(b"\xa9\"}\r\n\r\n").unwrap();
        assert_eq!(
            frames,
            vec![SseFrame::new(
                "MESSAGE_CHUNK",
                "{\"type\":\"text\",\"content\":\"\u{e9}\"}"
            )]
        );
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b": keep-alive\n\ndata: line one\ndata:line two\nid: 7\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::new("message", "line one\nline two")]);
    }

    #[test]
    fn test_blank_lines_alone_dispatch_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"\n\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_frame_is_held_back() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: TASK_DONE\n").unwrap().is_empty());
    }

    #[test]
    fn test_overlong_line_fails() {
        let mut parser = SseParser::new();
        assert!(parser.feed_bounded(b"data: 0123", 16).unwrap().is_empty());
        let err = parser.feed_bounded(b"456789abcdef", 16).unwrap_err();
        assert!(matches!(err, RestClientError::Sse(_)));
    }

    #[test]
    fn test_long_line_within_limit_completes() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed_bounded(b"data: 0123456789\n\nevent: TASK_DONE\n", 16)
            .unwrap();
        assert_eq!(frames, vec![SseFrame::new("message", "0123456789")]);
    }
}
