//! Websocket signaling hub client
//!
//! Speaks a minimal JSON frame protocol to a hub server (see the
//! `signalswarm-cli hub` command for a matching server):
//! - upstream: `{"op":"subscribe","topic":...}` and
//!   `{"op":"broadcast","topic":...,"message":...}`
//! - downstream: `{"topic":...,"message":...}` for every frame broadcast to
//!   a topic this client subscribed to, including its own broadcasts.

use super::{HubError, SignalingHub, Subscription};
use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Frame sent from a client to the hub server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Broadcast { topic: String, message: Value },
}

/// Frame pushed from the hub server to a subscribed client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub topic: String,
    pub message: Value,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct Inner {
    topics: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    closed: AtomicBool,
}

/// Client connection to a websocket hub server
#[derive(Clone)]
pub struct WsHub {
    inner: Arc<Inner>,
    writer: Arc<Mutex<WsSink>>,
}

impl WsHub {
    /// Connect to a hub server, e.g. `ws://127.0.0.1:9001`.
    ///
    /// Spawns a background task that routes downstream frames into the
    /// matching subscriptions for as long as the socket lives.
    pub async fn connect(url: &str) -> Result<Self, HubError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| HubError::ConnectionFailed(e.to_string()))?;
        let (sink, mut stream) = socket.split();

        let inner = Arc::new(Inner {
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let frame: ServerFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "dropping malformed hub frame");
                        continue;
                    }
                };
                let mut topics = reader_inner.topics.write();
                if let Some(subs) = topics.get_mut(&frame.topic) {
                    subs.retain(|tx| tx.send(frame.message.clone()).is_ok());
                }
            }
            // Socket gone: end every subscription stream.
            reader_inner.closed.store(true, Ordering::SeqCst);
            reader_inner.topics.write().clear();
            debug!("hub socket closed");
        });

        Ok(Self {
            inner,
            writer: Arc::new(Mutex::new(sink)),
        })
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), HubError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| HubError::BroadcastFailed(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|e| HubError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl SignalingHub for WsHub {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, HubError> {
        if !self.is_open() {
            return Err(HubError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        self.send_frame(&ClientFrame::Subscribe {
            topic: topic.to_string(),
        })
        .await
        .map_err(|e| HubError::SubscribeFailed(e.to_string()))?;
        Ok(Subscription::new(rx))
    }

    async fn broadcast(&self, topic: &str, message: Value) -> Result<(), HubError> {
        if !self.is_open() {
            return Err(HubError::Closed);
        }
        self.send_frame(&ClientFrame::Broadcast {
            topic: topic.to_string(),
            message,
        })
        .await
    }

    fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), HubError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.topics.write().clear();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            warn!(error = %e, "error closing hub socket");
        }
        Ok(())
    }
}
