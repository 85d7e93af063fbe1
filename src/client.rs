//! The single-owner client loop.
//!
//! One task owns the [`SessionProtocol`] and multiplexes the scheduler tick,
//! inbound transport events and reader input through `tokio::select!`, so
//! protocol state is never shared and needs no locking.

use gatecore::net::{Transport, TransportEvent, TransportFactory};
use gatecore::protocol::{Effect, Event, SessionProtocol};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, Result};
use crate::feedback::{FeedbackSink, Signal};

type Connection = (Arc<dyn Transport>, mpsc::Receiver<TransportEvent>);

/// Why a connected session stopped.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected,
}

pub struct Client {
    protocol: SessionProtocol,
    transport_factory: Arc<dyn TransportFactory>,
    feedback: Arc<dyn FeedbackSink>,
    tick_interval: Duration,
    reconnect_delay: Duration,
    /// Zero retries forever.
    reconnect_attempts: u32,
    shutdown_notifier: Arc<Notify>,
}

impl Client {
    pub fn new(
        protocol: SessionProtocol,
        transport_factory: Arc<dyn TransportFactory>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            protocol,
            transport_factory,
            feedback,
            tick_interval: Duration::from_millis(50),
            reconnect_delay: Duration::from_secs(1),
            reconnect_attempts: 0,
            shutdown_notifier: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self> {
        let protocol =
            SessionProtocol::new(config.device_id.clone(), config.secret()?, config.protocol)
                .map_err(ConfigError::from)?;
        Ok(Self::new(protocol, transport_factory, feedback)
            .with_tick_interval(config.tick_interval())
            .with_reconnect(config.reconnect_delay(), config.reconnect_attempts))
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_reconnect(mut self, delay: Duration, attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.reconnect_attempts = attempts;
        self
    }

    /// Notify once to stop [`Client::run`] cleanly.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown_notifier.clone()
    }

    pub fn protocol(&self) -> &SessionProtocol {
        &self.protocol
    }

    /// Connects and drives the protocol until shutdown.
    ///
    /// Transport failures reconnect and restart the handshake. Returns
    /// [`ClientError::FatalTimeout`] when the protocol demands a device
    /// restart, and [`ClientError::ConnectFailed`] when the reconnect budget
    /// runs out.
    pub async fn run(&mut self, mut readings: mpsc::Receiver<String>) -> Result<()> {
        loop {
            let Some((transport, mut events)) = self.connect().await? else {
                info!(target: "Client", "Shutdown signaled while connecting");
                return Ok(());
            };
            self.protocol.restart();

            let outcome = self
                .run_session(transport.as_ref(), &mut events, &mut readings)
                .await;
            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    transport.disconnect().await;
                    return Ok(());
                }
                Ok(SessionEnd::Disconnected) => {
                    warn!(target: "Client", "Transport disconnected, reconnecting");
                }
                Err(ClientError::Transport(e)) => {
                    warn!(target: "Client", "Transport error: {e}, reconnecting");
                    transport.disconnect().await;
                }
                Err(e) => {
                    transport.disconnect().await;
                    return Err(e);
                }
            }
        }
    }

    async fn connect(&self) -> Result<Option<Connection>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport_factory.create_transport().await {
                Ok(connection) => {
                    info!(target: "Client", "Connected after {attempt} attempt(s)");
                    return Ok(Some(connection));
                }
                Err(e) => {
                    warn!(target: "Client", "Connection attempt {attempt} failed: {e}");
                    self.feedback.signal(Signal::Reconnecting);
                    if self.reconnect_attempts != 0 && attempt >= self.reconnect_attempts {
                        return Err(ClientError::ConnectFailed {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => return Ok(None),
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn run_session(
        &mut self,
        transport: &dyn Transport,
        events: &mut mpsc::Receiver<TransportEvent>,
        readings: &mut mpsc::Receiver<String>,
    ) -> Result<SessionEnd> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown_notifier.clone();

        loop {
            let effects = tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!(target: "Client", "Shutdown signaled, leaving session loop");
                    return Ok(SessionEnd::Shutdown);
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Message { topic, payload }) => {
                        self.protocol.handle(Event::Message {
                            topic: &topic,
                            payload: &payload,
                        })
                    }
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Client", "Transport reports connected");
                        continue;
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        return Ok(SessionEnd::Disconnected);
                    }
                },
                Some(tag_id) = readings.recv() => {
                    self.protocol.handle(Event::Reading(&tag_id))
                }
                _ = ticker.tick() => self.protocol.handle(Event::Tick),
            };

            self.apply(transport, effects).await?;
        }
    }

    async fn apply(&self, transport: &dyn Transport, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::Publish { topic, payload } => {
                    transport.publish(topic, payload.as_bytes()).await?;
                }
                Effect::Feedback(code) => self.feedback.signal(Signal::Response(code)),
                Effect::Restart => {
                    error!(target: "Client", "Protocol requested a device restart");
                    return Err(ClientError::FatalTimeout);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::mock::RecordingFeedback;
    use crate::transport::mock::MockTransportFactory;
    use bytes::Bytes;
    use gatecore::protocol::{ProtocolConfig, ResponseCode, SessionState, SharedSecret, Topic};
    use tokio::task::JoinHandle;

    const DEVICE: &str = "reader-01";
    const TICK: Duration = Duration::from_millis(10);

    fn client(factory: Arc<MockTransportFactory>, feedback: RecordingFeedback) -> Client {
        let secret = SharedSecret::new(b"M1k3y1sdAb3St0n3".to_vec()).unwrap();
        let protocol = SessionProtocol::new(DEVICE, secret, ProtocolConfig::default()).unwrap();
        Client::new(protocol, factory, Arc::new(feedback))
            .with_tick_interval(TICK)
            .with_reconnect(Duration::from_millis(100), 0)
    }

    fn spawn(
        mut client: Client,
        readings: mpsc::Receiver<String>,
    ) -> JoinHandle<(Client, Result<()>)> {
        tokio::spawn(async move {
            let result = client.run(readings).await;
            (client, result)
        })
    }

    async fn deliver(factory: &MockTransportFactory, topic: &str, body: &str) {
        let events = factory.events().unwrap();
        events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: Bytes::from(format!("{DEVICE}###{body}")),
            })
            .await
            .unwrap();
    }

    /// Sleeps between tick instants so every due tick has been handled.
    async fn settle(ticks: u32) {
        tokio::time::sleep(TICK * ticks + TICK / 2).await;
    }

    fn topics(factory: &MockTransportFactory) -> Vec<Topic> {
        factory
            .transport()
            .unwrap()
            .published()
            .into_iter()
            .map(|(topic, _)| topic)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_reading_and_response() {
        let factory = Arc::new(MockTransportFactory::default());
        let feedback = RecordingFeedback::default();
        let client = client(factory.clone(), feedback.clone());
        let shutdown = client.shutdown_handle();
        let (reading_tx, reading_rx) = mpsc::channel(4);
        let handle = spawn(client, reading_rx);

        settle(1).await;
        let published = factory.transport().unwrap().published();
        assert_eq!(published, vec![(Topic::Init, "reader-01###INIT".to_string())]);

        deliver(&factory, "ack", "q8Zt3LmN0pRsT5vW").await;
        settle(1).await;
        assert_eq!(topics(&factory), vec![Topic::Init, Topic::Hmac]);

        deliver(&factory, "ack", "authenticationSuccessful").await;
        reading_tx.send("04a1b2c3".to_string()).await.unwrap();
        settle(1).await;
        assert_eq!(topics(&factory), vec![Topic::Init, Topic::Hmac, Topic::Access]);

        deliver(&factory, "response", "201").await;
        settle(1).await;
        assert_eq!(
            feedback.signals(),
            vec![Signal::Response(ResponseCode::CheckIn)]
        );

        shutdown.notify_one();
        let (client, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(client.protocol().state(), SessionState::Authenticated);
        assert!(!client.protocol().has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_until_transport_available() {
        let factory = Arc::new(MockTransportFactory::failing(2));
        let feedback = RecordingFeedback::default();
        let client = client(factory.clone(), feedback.clone());
        let shutdown = client.shutdown_handle();
        let (_reading_tx, reading_rx) = mpsc::channel(4);
        let handle = spawn(client, reading_rx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(factory.connects(), 1);
        assert_eq!(
            feedback.signals(),
            vec![Signal::Reconnecting, Signal::Reconnecting]
        );
        assert_eq!(topics(&factory).first(), Some(&Topic::Init));

        shutdown.notify_one();
        handle.await.unwrap().1.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_reconnect_gives_up() {
        let factory = Arc::new(MockTransportFactory::failing(10));
        let feedback = RecordingFeedback::default();
        let client =
            client(factory.clone(), feedback.clone()).with_reconnect(Duration::from_millis(100), 3);
        let (_reading_tx, reading_rx) = mpsc::channel(4);

        let (_, result) = spawn(client, reading_rx).await.unwrap();
        match result {
            Err(ClientError::ConnectFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(factory.connects(), 0);
        assert_eq!(feedback.signals().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_fatal() {
        let factory = Arc::new(MockTransportFactory::default());
        let feedback = RecordingFeedback::default();
        let client = client(factory.clone(), feedback.clone());
        let (_reading_tx, reading_rx) = mpsc::channel(4);

        let (_, result) = spawn(client, reading_rx).await.unwrap();
        assert!(matches!(result, Err(ClientError::FatalTimeout)));
        assert_eq!(
            topics(&factory),
            vec![Topic::Init, Topic::Init, Topic::Init]
        );
        assert_eq!(
            feedback.signals(),
            vec![
                Signal::Response(ResponseCode::Timeout),
                Signal::Response(ResponseCode::Timeout)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_restarts_handshake_on_new_transport() {
        let factory = Arc::new(MockTransportFactory::default());
        let feedback = RecordingFeedback::default();
        let client = client(factory.clone(), feedback.clone());
        let shutdown = client.shutdown_handle();
        let (_reading_tx, reading_rx) = mpsc::channel(4);
        let handle = spawn(client, reading_rx);

        settle(1).await;
        deliver(&factory, "ack", "q8Zt3LmN0pRsT5vW").await;
        settle(1).await;
        assert_eq!(topics(&factory), vec![Topic::Init, Topic::Hmac]);

        factory
            .events()
            .unwrap()
            .send(TransportEvent::Disconnected)
            .await
            .unwrap();
        settle(1).await;
        assert_eq!(factory.connects(), 2);
        assert_eq!(topics(&factory), vec![Topic::Init]);

        shutdown.notify_one();
        let (client, result) = handle.await.unwrap();
        result.unwrap();
        assert!(client.protocol().session_token().is_none());
    }
}
