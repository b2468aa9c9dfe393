//! Server-sent-events implementation of the channel transport.
//!
//! An alternative, broadcast-only transport: a long-lived HTTP response
//! stream delivering named events (`item-updated`) as they occur. Presence
//! operations are not supported here; only the ban-list synchronizer, which
//! never tracks, rides this variant. Reconnection is the synchronizer's
//! concern, driven by its retry scheduler.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::PresenceRecord;
use crate::error::TransportError;
use crate::transport::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelTransport};

const EVENT_BUFFER: usize = 64;

/// Broadcast-only channel transport over an SSE stream
pub struct SseTransport {
    base_url: String,
    client: reqwest::Client,
}

impl SseTransport {
    /// `base_url` is the HTTP endpoint root, e.g. `http://127.0.0.1:8787`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelTransport for SseTransport {
    async fn subscribe(
        &self,
        topic: &str,
        _config: ChannelConfig,
    ) -> Result<Box<dyn ChannelHandle>, TransportError> {
        let url = format!("{}/stream?topic={}", self.base_url, topic);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Connect(format!(
                "HTTP {}",
                response.status()
            )));
        }
        tracing::debug!("SSE stream '{}' open", topic);

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        // Response headers received: the stream is live
        let _ = event_tx.send(ChannelEvent::Subscribed).await;
        let reader = tokio::spawn(read_loop(response, event_tx));

        Ok(Box::new(SseChannel {
            events: Some(event_rx),
            reader,
        }))
    }
}

async fn read_loop(response: reqwest::Response, events: mpsc::Sender<ChannelEvent>) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for sse_event in parser.feed(&bytes) {
                    let payload = match serde_json::from_str::<Value>(&sse_event.data) {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(
                                "Malformed SSE data for '{}': {}",
                                sse_event.event,
                                e
                            );
                            continue;
                        }
                    };
                    let event = ChannelEvent::Broadcast {
                        event: sse_event.event,
                        payload,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = events.send(ChannelEvent::ChannelError(e.to_string())).await;
                return;
            }
        }
    }
    let _ = events.send(ChannelEvent::Closed).await;
}

struct SseChannel {
    events: Option<mpsc::Receiver<ChannelEvent>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl ChannelHandle for SseChannel {
    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    async fn track(&mut self, _record: PresenceRecord) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("track over SSE"))
    }

    async fn untrack(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("untrack over SSE"))
    }

    async fn send(&mut self, _event: &str, _payload: Value) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("send over SSE"))
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.reader.abort();
        Ok(())
    }
}

/// One parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream names none
    pub event: String,
    pub data: String,
}

/// Incremental parser for the SSE line protocol.
///
/// Events may arrive split across chunks; `feed` buffers partial input and
/// yields only completed (blank-line-terminated) events. The buffer holds
/// raw bytes and decoding happens per completed block, so a multi-byte UTF-8
/// character straddling a chunk boundary stays intact. Comment lines
/// (keep-alives) and unknown fields are skipped.
pub struct SseParser {
    buffer: Vec<u8>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        // Normalize CRLF so block splitting only deals with \n. A trailing
        // lone \r is kept; it collapses once its \n arrives in a later chunk.
        if self.buffer.contains(&b'\r') {
            let mut normalized = Vec::with_capacity(self.buffer.len());
            let mut i = 0;
            while i < self.buffer.len() {
                if self.buffer[i] == b'\r' && self.buffer.get(i + 1) == Some(&b'\n') {
                    i += 1;
                    continue;
                }
                normalized.push(self.buffer[i]);
                i += 1;
            }
            self.buffer = normalized;
        }

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
            let text = String::from_utf8_lossy(&block);
            if let Some(event) = parse_block(text.trim_end_matches('\n')) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = "message".to_string();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue; // comment / keep-alive
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = value.to_string(),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}
