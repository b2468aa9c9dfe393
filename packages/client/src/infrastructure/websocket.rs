//! WebSocket implementation of the channel transport.
//!
//! One WebSocket connection per subscribed channel, scoped by topic through
//! the connection URL. The read half is pumped by a spawned task that maps
//! tagged JSON frames to [`ChannelEvent`]s; a completed handshake is the
//! subscription ack.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::domain::PresenceRecord;
use crate::error::TransportError;
use crate::transport::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelTransport};

use super::dto::{ClientFrame, ServerFrame};

const EVENT_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Channel transport over one WebSocket connection per topic
pub struct WebSocketTransport {
    base_url: String,
}

impl WebSocketTransport {
    /// `base_url` is the ws/wss endpoint root, e.g. `ws://127.0.0.1:8787`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn subscribe(
        &self,
        topic: &str,
        config: ChannelConfig,
    ) -> Result<Box<dyn ChannelHandle>, TransportError> {
        let mut url = format!("{}/realtime?topic={}", self.base_url, topic);
        if let Some(key) = &config.presence_key {
            url.push_str(&format!("&presence_key={}", key));
        }

        let (ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!("WebSocket channel '{}' open", topic);

        let (write, read) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // Handshake completed: the subscription is live
        let _ = event_tx.send(ChannelEvent::Subscribed).await;
        let reader = tokio::spawn(read_loop(read, event_tx));

        Ok(Box::new(WebSocketChannel {
            write,
            events: Some(event_rx),
            reader,
        }))
    }
}

async fn read_loop(mut read: WsSource, events: mpsc::Sender<ChannelEvent>) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                Ok(frame) => {
                    let event = match frame {
                        ServerFrame::PresenceSync { entries } => ChannelEvent::PresenceSync(
                            entries.into_iter().map(Into::into).collect(),
                        ),
                        ServerFrame::PresenceJoin { entries } => ChannelEvent::PresenceJoin(
                            entries.into_iter().map(Into::into).collect(),
                        ),
                        ServerFrame::PresenceLeave { keys } => ChannelEvent::PresenceLeave(keys),
                        ServerFrame::Broadcast { event, payload } => {
                            ChannelEvent::Broadcast { event, payload }
                        }
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("Ignoring unparseable frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                let _ = events.send(ChannelEvent::Closed).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(ChannelEvent::ChannelError(e.to_string())).await;
                return;
            }
        }
    }
    // Stream ended without a close frame
    let _ = events.send(ChannelEvent::Closed).await;
}

struct WebSocketChannel {
    write: WsSink,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    reader: JoinHandle<()>,
}

impl WebSocketChannel {
    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|e| TransportError::Send(e.to_string()))?;
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl ChannelHandle for WebSocketChannel {
    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    async fn track(&mut self, record: PresenceRecord) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Track { payload: record }).await
    }

    async fn untrack(&mut self) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Untrack).await
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Broadcast {
            event: event.to_string(),
            payload,
        })
        .await
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let _ = self.write.send(Message::Close(None)).await;
        self.reader.abort();
        Ok(())
    }
}
