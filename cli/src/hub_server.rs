// Websocket hub server — topic fan-out for swarm signaling.
//
// Speaks the frame protocol of `signalswarm_core::hub::ws::WsHub`: clients
// send subscribe/broadcast frames upstream, the server pushes every frame
// broadcast to a topic to all of that topic's current subscribers,
// including the sender itself.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use signalswarm_core::hub::ws::{ClientFrame, ServerFrame};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Default)]
struct HubState {
    topics: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Message>)>>>,
    next_client: AtomicU64,
}

impl HubState {
    fn subscribe(&self, client: u64, topic: &str, sender: mpsc::UnboundedSender<Message>) {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((client, sender));
    }

    /// Fan a frame out to every subscriber of the topic, pruning gone ones.
    fn publish(&self, topic: &str, message: Value) {
        let frame = ServerFrame {
            topic: topic.to_string(),
            message,
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "unencodable frame dropped");
                return;
            }
        };
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|(_, tx)| tx.send(Message::Text(text.clone())).is_ok());
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    fn drop_client(&self, client: u64) {
        let mut topics = self.topics.lock();
        topics.retain(|_, subscribers| {
            subscribers.retain(|(id, _)| *id != client);
            !subscribers.is_empty()
        });
    }
}

/// Run the hub server until the process is stopped.
pub async fn run(listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(%listen, "hub server listening");

    let state = Arc::new(HubState::default());
    loop {
        let (stream, peer_addr) = listener.accept().await.context("accept failed")?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_client(state, stream, peer_addr).await {
                debug!(%peer_addr, error = %e, "client session ended");
            }
        });
    }
}

async fn handle_client(
    state: Arc<HubState>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let (mut sink, mut reader) = socket.split();

    let client = state.next_client.fetch_add(1, Ordering::SeqCst);
    debug!(%peer_addr, client, "client connected");

    // All fan-out for this client funnels through one channel so topic
    // publishing never blocks on a slow socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Subscribe { topic }) => {
                debug!(client, %topic, "subscribe");
                state.subscribe(client, &topic, tx.clone());
            }
            Ok(ClientFrame::Broadcast { topic, message }) => {
                state.publish(&topic, message);
            }
            Err(e) => {
                warn!(client, error = %e, "malformed client frame dropped");
            }
        }
    }

    state.drop_client(client);
    drop(tx);
    let _ = writer.await;
    debug!(%peer_addr, client, "client disconnected");
    Ok(())
}
