use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{ApiError, StreamFrame};

/// Incremental Server-Sent-Events parser. Bytes go in as they arrive off
/// the wire; the data of each completed event comes out.
#[derive(Debug, Default)]
pub struct SseParser {
    byte_buf: Vec<u8>,
    line_buf: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);
        let decoded = self.decode_available();
        self.line_buf.push_str(&decoded);

        let mut events = Vec::new();
        while let Some(newline) = self.line_buf.find('\n') {
            let mut line: String = self.line_buf.drain(..=newline).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode as much valid UTF-8 as possible, keeping a split multi-byte
    /// sequence for the next chunk.
    fn decode_available(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.byte_buf) {
                Ok(s) => {
                    out.push_str(s);
                    self.byte_buf.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.byte_buf[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.byte_buf.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.byte_buf.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            return Some(data);
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        // event, id and retry carry nothing this client uses
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }
}

/// Forward every event of an SSE byte stream to `tx`, in arrival order,
/// then a final `Closed`. Stops without `Closed` when cancelled or when the
/// receiver goes away.
pub async fn pump_events<S, E>(
    stream: S,
    tx: &mpsc::Sender<StreamFrame>,
    cancel: &CancellationToken,
) -> Result<(), ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut parser = SseParser::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Stream cancelled, dropping connection");
                return Ok(());
            }
            next = stream.next() => next,
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(ApiError::NetworkError(format!("Stream error: {}", e))),
            None => break,
        };

        for event in parser.feed(&bytes) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if tx.send(StreamFrame::Event(event)).await.is_err() {
                return Ok(()); // receiver dropped
            }
        }
    }

    let _ = tx.send(StreamFrame::Closed).await;
    Ok(())
}
