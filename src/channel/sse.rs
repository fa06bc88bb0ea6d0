//! Server-Sent Events transport for the attendance push endpoint.

use super::reconnecting::PushTransport;
use crate::error::TransportError;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use tracing::warn;

/// Connects to an SSE endpoint and yields the `data` of each event.
#[derive(Clone, Debug)]
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushTransport for SseTransport {
    type Stream = BoxStream<'static, Result<String, TransportError>>;

    async fn connect(&self) -> Result<Self::Stream, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response.bytes_stream().boxed();
        let frames = stream::unfold(
            (bytes, SseParser::default(), false),
            |(mut bytes, mut parser, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    if let Some(data) = parser.next_data() {
                        return Some((Ok(data), (bytes, parser, false)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            if let Err(err) = parser.feed(&chunk) {
                                return Some((Err(err), (bytes, parser, true)));
                            }
                        }
                        Some(Err(err)) => {
                            return Some((Err(TransportError::from(err)), (bytes, parser, true)))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(frames.boxed())
    }
}

/// Incremental parser for the `text/event-stream` format.
///
/// Only `data` fields are kept; `event`, `id`, `retry` and comments are
/// skipped. A payload that is not valid UTF-8 is dropped whole. Lines and
/// frames are capped at `max_frame` bytes.
#[derive(Debug)]
pub struct SseParser {
    /// Bytes of an incomplete line.
    partial: Vec<u8>,
    /// Data of the event being assembled, `None` until a `data` line.
    data: Option<Vec<u8>>,
    /// Completed event payloads.
    ready: VecDeque<String>,
    max_frame: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_frame(Self::DEFAULT_MAX_FRAME)
    }
}

impl SseParser {
    /// Attendance payloads are a few hundred bytes.
    pub const DEFAULT_MAX_FRAME: usize = 256 * 1024;

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            partial: Vec::new(),
            data: None,
            ready: VecDeque::new(),
            max_frame,
        }
    }

    /// Feed a chunk of the response body.
    ///
    /// Fails once a line or frame outgrows the cap; the parser is reset and
    /// the stream should be treated as broken.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        self.partial.extend_from_slice(chunk);
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.line(&line);
            if self.data.as_ref().is_some_and(|d| d.len() > self.max_frame) {
                return Err(self.overflow());
            }
        }
        if self.partial.len() > self.max_frame {
            return Err(self.overflow());
        }
        Ok(())
    }

    /// Next completed payload, if any.
    pub fn next_data(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    fn line(&mut self, line: &[u8]) {
        if line.is_empty() {
            if let Some(data) = self.data.take() {
                match String::from_utf8(data) {
                    Ok(payload) => self.ready.push_back(payload),
                    Err(err) => warn!(error = %err, "dropping event frame with invalid UTF-8"),
                }
            }
            return;
        }
        if line[0] == b':' {
            return;
        }
        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        if field == b"data" {
            match &mut self.data {
                Some(data) => {
                    data.push(b'\n');
                    data.extend_from_slice(value);
                }
                None => self.data = Some(value.to_vec()),
            }
        }
    }

    fn overflow(&mut self) -> TransportError {
        self.partial.clear();
        self.data = None;
        TransportError::Stream(format!("event frame exceeds {} bytes", self.max_frame))
    }
}
