//! Realtime websocket channel.
//!
//! On connect a client receives an `initial` frame with the current session list,
//! followed by one frame per session event. A client that falls behind gets a
//! `resync_required` frame and should re-fetch `GET /sessions`.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::Coordinator;
use crate::coordinator::{Delivery, SessionFilter, SessionSummary};

/// Control frames sent by the server. Session events are sent as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Initial { sessions: Vec<SessionSummary> },
    ResyncRequired { missed: u64 },
    Pong,
}

/// Frames accepted from clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Ping,
}

/// Websocket listener pushing session events to observers.
pub struct RealtimeServer {
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
}

impl RealtimeServer {
    pub fn new(coordinator: Arc<Coordinator>, listener: TcpListener) -> Self {
        Self {
            coordinator,
            listener,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let coordinator = Arc::clone(&self.coordinator);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(coordinator, stream, peer, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept realtime connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Realtime channel stopped");
    }
}

async fn handle_connection(
    coordinator: Arc<Coordinator>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, "Websocket handshake failed: {}", e);
            return;
        }
    };

    tracing::debug!(%peer, "Realtime client connected");

    // Subscribe before taking the snapshot so no event falls between the two.
    let mut subscription = coordinator.subscribe();
    let sessions = coordinator.list_sessions(&SessionFilter::default()).await;

    let (mut sink, mut incoming) = ws.split();

    if send_json(&mut sink, &ServerFrame::Initial { sessions }).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            delivery = subscription.recv() => {
                let sent = match delivery {
                    Delivery::Event(event) => send_json(&mut sink, &event).await,
                    Delivery::Lagged { missed } => {
                        tracing::warn!(%peer, missed, "Realtime client lagged, requesting resync");
                        send_json(&mut sink, &ServerFrame::ResyncRequired { missed }).await
                    }
                    Delivery::Closed => break,
                };
                if sent.is_err() {
                    break;
                }
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Ping) => {
                            if send_json(&mut sink, &ServerFrame::Pong).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(%peer, "Ignoring client frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%peer, "Realtime connection error: {}", e);
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    tracing::debug!(%peer, "Realtime client disconnected");
}

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

async fn send_json<T: Serialize>(
    sink: &mut WsSink,
    frame: &T,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode realtime frame: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await
}
