//! WebSocket bridge transport.
//!
//! The broker is reached through a small JSON-over-WebSocket bridge: every
//! WebSocket text frame carries one [`BridgeFrame`]. The bridge speaks
//! publish/subscribe with at-most-once delivery, which is all the session
//! protocol needs.

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gatecore::net::{Transport, TransportEvent, TransportFactory};
use gatecore::protocol::Topic;
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One bridge message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeFrame {
    Connect {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Subscribe {
        topics: Vec<String>,
    },
    Publish {
        topic: String,
        payload: String,
    },
    /// Broker to client delivery on a subscribed topic.
    Message {
        topic: String,
        payload: String,
    },
}

impl BridgeFrame {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

pub struct WebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }

    async fn send(&self, frame: &BridgeFrame) -> anyhow::Result<()> {
        let text = frame.to_json()?;
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow!("Socket is closed"))?;
        sink.send(Message::text(text))
            .await
            .map_err(|e| anyhow!("WebSocket send error: {e}"))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn publish(&self, topic: Topic, payload: &[u8]) -> anyhow::Result<()> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| anyhow!("Payload for {topic} is not UTF-8: {e}"))?;
        debug!(target: "Transport", "--> {topic}: {payload}");
        self.send(&BridgeFrame::Publish {
            topic: topic.as_str().to_string(),
            payload: payload.to_string(),
        })
        .await
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(target: "Transport", "Error closing websocket: {e}");
            }
        }
    }
}

/// Dials the bridge, authenticates and subscribes to the inbound topics.
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    url: String,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        info!(target: "Transport", "Dialing {}", self.url);
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow!("WebSocket connect failed: {e}"))?;
        let (sink, stream) = ws.split();
        let transport = Arc::new(WebSocketTransport::new(sink));

        transport
            .send(&BridgeFrame::Connect {
                client_id: self.client_id.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
            })
            .await?;
        transport
            .send(&BridgeFrame::Subscribe {
                topics: Topic::INBOUND
                    .iter()
                    .map(|t| t.as_str().to_string())
                    .collect(),
            })
            .await?;
        info!(target: "Transport", "Connected as {}", self.client_id);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

/// Maps one inbound bridge text frame onto a transport event.
fn inbound_event(text: &str) -> Option<TransportEvent> {
    match BridgeFrame::from_json(text) {
        Ok(BridgeFrame::Message { topic, payload }) => Some(TransportEvent::Message {
            topic,
            payload: Bytes::from(payload),
        }),
        Ok(other) => {
            debug!(target: "Transport", "Ignoring bridge frame {other:?}");
            None
        }
        Err(e) => {
            warn!(target: "Transport", "Malformed bridge frame: {e}");
            None
        }
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(target: "Transport", "<-- {}", text.as_str());
                if let Some(event) = inbound_event(text.as_str()) {
                    if event_tx.send(event).await.is_err() {
                        warn!(target: "Transport", "Event receiver dropped, closing read pump");
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!(target: "Transport", "Received close frame");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(target: "Transport", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Transport", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every publish instead of sending it.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        published: StdMutex<Vec<(Topic, String)>>,
    }

    impl MockTransport {
        pub fn published(&self) -> Vec<(Topic, String)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn publish(&self, topic: Topic, payload: &[u8]) -> anyhow::Result<()> {
            let payload = String::from_utf8(payload.to_vec())?;
            self.published.lock().unwrap().push((topic, payload));
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    /// Hands out [`MockTransport`]s, failing the first `failures` attempts.
    #[derive(Debug, Default)]
    pub struct MockTransportFactory {
        failures: AtomicUsize,
        connects: AtomicUsize,
        transports: StdMutex<Vec<Arc<MockTransport>>>,
        senders: StdMutex<Vec<mpsc::Sender<TransportEvent>>>,
    }

    impl MockTransportFactory {
        pub fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// The most recently created transport.
        pub fn transport(&self) -> Option<Arc<MockTransport>> {
            self.transports.lock().unwrap().last().cloned()
        }

        /// Sender feeding the most recently created transport's events.
        pub fn events(&self) -> Option<mpsc::Sender<TransportEvent>> {
            self.senders.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("broker unreachable"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);

            let transport = Arc::new(MockTransport::default());
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            tx.send(TransportEvent::Connected).await?;
            self.transports.lock().unwrap().push(transport.clone());
            self.senders.lock().unwrap().push(tx);
            Ok((transport, rx))
        }
    }
}
