//! Session protocol state machine.
//!
//! States: UNINITIALIZED → AWAITING_INIT_ACK → TOKEN_RECEIVED →
//! AWAITING_AUTH_ACK → AUTHENTICATED, with at most one pending transmission
//! while authenticated.
//!
//! The machine is pure: every input (a tick, an inbound message, a reading)
//! mutates the owned state and returns the effects the runtime must carry
//! out. Every recoverable anomaly returns to UNINITIALIZED; only the hard
//! ack-wait threshold escalates to [`Effect::Restart`].

use base64::prelude::*;
use log::{debug, error, info, warn};

use super::access::{self, SessionToken, SharedSecret};
use super::config::ProtocolConfig;
use super::error::{ProtocolError, Result};
use super::message::{
    AckBody, FRAME_SEPARATOR, INIT_BODY, ResponseCode, Topic, encode_frame, parse_frame,
};
use crate::crypto::MAC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No init request outstanding; the next tick publishes one.
    Uninitialized,
    /// Init published, waiting for a session token.
    AwaitingInitAck,
    /// Token accepted and authentication code computed; the next tick
    /// publishes it.
    TokenReceived,
    /// Authentication code published, waiting for the verdict.
    AwaitingAuthAck,
    /// Readings may be encrypted and published.
    Authenticated,
}

impl SessionState {
    pub fn is_awaiting_ack(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingInitAck | SessionState::AwaitingAuthAck
        )
    }
}

/// An input to the state machine.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// One iteration of the scheduling loop.
    Tick,
    /// A message delivered by the transport.
    Message { topic: &'a str, payload: &'a [u8] },
    /// A tag identifier produced by the reader.
    Reading(&'a str),
}

/// An output the runtime must carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Publish { topic: Topic, payload: String },
    /// Drive the feedback collaborator (LEDs, buzzer, log).
    Feedback(ResponseCode),
    /// Unrecoverable: the whole device must restart.
    Restart,
}

/// The reading currently awaiting a `response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransmission {
    pub tag_id: String,
    pub elapsed: u32,
}

/// Per-handshake secrets. Replaced on every new token, dropped on restart.
#[derive(Debug, Default)]
struct Session {
    token: Option<SessionToken>,
    auth_code: Option<[u8; MAC_LEN]>,
}

/// Suppresses repeats of the last transmitted reading.
///
/// The remembered reading belongs to the session: it is forgotten whenever
/// the handshake restarts, except for a rekey after a confirmed response.
#[derive(Debug, Default)]
struct DuplicateFilter {
    last_sent: Option<String>,
    /// Ticks since the last `access` publish or `response`. `None` until the
    /// first exchange.
    idle_ticks: Option<u32>,
}

impl DuplicateFilter {
    fn tick(&mut self) {
        if let Some(idle) = self.idle_ticks.as_mut() {
            *idle = idle.saturating_add(1);
        }
    }

    fn mark_exchange(&mut self) {
        self.idle_ticks = Some(0);
    }

    fn cooling_down(&self, cooldown: u32) -> bool {
        self.idle_ticks.is_some_and(|idle| idle <= cooldown)
    }

    fn is_duplicate(&self, tag_id: &str, window: u32) -> bool {
        self.last_sent.as_deref() == Some(tag_id) && self.idle_ticks.is_some_and(|idle| idle <= window)
    }

    fn clear(&mut self) {
        self.last_sent = None;
    }
}

pub struct SessionProtocol {
    device_id: String,
    secret: SharedSecret,
    config: ProtocolConfig,
    state: SessionState,
    session: Session,
    /// Ticks in the current handshake attempt.
    ack_wait: u32,
    /// Ticks spent awaiting acks since the last ack for this device.
    unanswered: u32,
    pending: Option<PendingTransmission>,
    duplicates: DuplicateFilter,
    last_reading: Option<String>,
    ticks: u64,
}

impl std::fmt::Debug for SessionProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProtocol")
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .field("ack_wait", &self.ack_wait)
            .field("unanswered", &self.unanswered)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl SessionProtocol {
    pub fn new(
        device_id: impl Into<String>,
        secret: SharedSecret,
        config: ProtocolConfig,
    ) -> Result<Self> {
        let device_id = device_id.into();
        if device_id.is_empty() || device_id.contains(FRAME_SEPARATOR) {
            return Err(ProtocolError::InvalidDeviceId(device_id));
        }
        config.validate()?;

        Ok(Self {
            device_id,
            secret,
            config,
            state: SessionState::Uninitialized,
            session: Session::default(),
            ack_wait: 0,
            unanswered: 0,
            pending: None,
            duplicates: DuplicateFilter::default(),
            last_reading: None,
            ticks: 0,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// True while authenticated with one transmission awaiting a response.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingTransmission> {
        self.pending.as_ref()
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session.token.as_ref()
    }

    pub fn authentication_code(&self) -> Option<&[u8; MAC_LEN]> {
        self.session.auth_code.as_ref()
    }

    pub fn ack_wait(&self) -> u32 {
        self.ack_wait
    }

    pub fn unanswered(&self) -> u32 {
        self.unanswered
    }

    pub fn handle(&mut self, event: Event<'_>) -> Vec<Effect> {
        match event {
            Event::Tick => self.on_tick(),
            Event::Message { topic, payload } => self.on_message(topic, payload),
            Event::Reading(tag_id) => self.on_reading(tag_id),
        }
    }

    pub fn on_tick(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.ticks = self.ticks.wrapping_add(1);
        self.duplicates.tick();

        match self.state {
            SessionState::Uninitialized => {
                effects.push(self.publish(Topic::Init, INIT_BODY));
                self.state = SessionState::AwaitingInitAck;
                self.ack_wait = 0;
                info!(target: "Session", "Init message sent, waiting for ack");
            }
            SessionState::TokenReceived => {
                if let Some(code) = self.session.auth_code {
                    let encoded = BASE64_STANDARD.encode(code);
                    effects.push(self.publish(Topic::Hmac, &encoded));
                    self.state = SessionState::AwaitingAuthAck;
                    self.ack_wait = 0;
                    info!(target: "Session", "Authentication code sent, waiting for verdict");
                } else {
                    warn!(target: "Session", "Token state without an authentication code, restarting");
                    self.restart();
                }
            }
            SessionState::AwaitingInitAck | SessionState::AwaitingAuthAck => {
                self.ack_wait += 1;
                self.unanswered += 1;
                if self.unanswered >= self.config.ack_hard_timeout {
                    error!(
                        target: "Session",
                        "No ack for {} ticks, requesting device restart",
                        self.unanswered
                    );
                    self.reset();
                    effects.push(Effect::Restart);
                    return effects;
                }
                if self.ack_wait >= self.config.ack_soft_timeout {
                    warn!(
                        target: "Session",
                        "Ack lost after {} ticks in {:?}, restarting handshake",
                        self.ack_wait, self.state
                    );
                    effects.push(Effect::Feedback(ResponseCode::Timeout));
                    self.restart();
                }
            }
            SessionState::Authenticated => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.elapsed += 1;
                    if pending.elapsed > self.config.response_timeout {
                        warn!(
                            target: "Session",
                            "Timeout hit, response for {} lost",
                            pending.tag_id
                        );
                        self.pending = None;
                        self.duplicates.clear();
                    }
                }
            }
        }

        let every = u64::from(self.config.status_log_every);
        if every > 0 && self.ticks % every == 0 {
            debug!(
                target: "Session",
                "Status: state={:?} pending={} current reading={}",
                self.state,
                self.pending.is_some(),
                self.last_reading.as_deref().unwrap_or("<none>")
            );
        }

        effects
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Vec<Effect> {
        let Some(frame) = parse_frame(payload) else {
            debug!(target: "Session", "Ignoring malformed payload on {topic}");
            return Vec::new();
        };
        if frame.device_id != self.device_id {
            debug!(
                target: "Session",
                "Message not for this device ({}) on {topic}",
                frame.device_id
            );
            return Vec::new();
        }
        debug!(target: "Session", "<-- {topic}: {}", frame.body);

        match Topic::parse(topic) {
            Some(Topic::Ack) => self.on_ack(frame.body),
            Some(Topic::Response) => self.on_response(frame.body),
            _ => {
                debug!(target: "Session", "Ignoring message on unexpected topic {topic}");
                Vec::new()
            }
        }
    }

    fn on_ack(&mut self, body: &str) -> Vec<Effect> {
        let ack = AckBody::parse(body);
        self.unanswered = 0;

        match self.state {
            SessionState::AwaitingInitAck => {
                self.ack_wait = 0;
                match ack {
                    AckBody::Token(token) => {
                        let code = access::authentication_code(&self.secret, &token);
                        debug!(
                            target: "Session",
                            "Init ack with session token, auth code {}",
                            hex::encode(code)
                        );
                        self.session = Session {
                            token: Some(token),
                            auth_code: Some(code),
                        };
                        self.state = SessionState::TokenReceived;
                    }
                    ack if ack.is_rejection() => {
                        info!(target: "Session", "Init rejected ({ack:?}), restarting");
                        self.restart();
                    }
                    ack => {
                        warn!(target: "Session", "Unidentified init ack {ack:?}, restarting");
                        self.restart();
                    }
                }
            }
            SessionState::AwaitingAuthAck => {
                self.ack_wait = 0;
                match ack {
                    AckBody::AuthenticationSuccessful => {
                        info!(target: "Session", "Authentication succeeded");
                        self.state = SessionState::Authenticated;
                    }
                    ack if ack.is_rejection() => {
                        info!(target: "Session", "Authentication rejected ({ack:?}), restarting");
                        self.restart();
                    }
                    ack => {
                        warn!(target: "Session", "Unidentified auth ack {ack:?}, restarting");
                        self.restart();
                    }
                }
            }
            SessionState::Authenticated | SessionState::TokenReceived if ack.is_rejection() => {
                info!(target: "Session", "Session ended by peer ({ack:?}), restarting");
                self.restart();
            }
            state => {
                debug!(target: "Session", "Ignoring ack {ack:?} in {state:?}");
            }
        }

        Vec::new()
    }

    fn on_response(&mut self, body: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.ack_wait = 0;
        self.unanswered = 0;
        self.pending = None;
        self.duplicates.mark_exchange();

        match ResponseCode::parse(body) {
            Some(code) => {
                info!(target: "Session", "Response {code} received");
                effects.push(Effect::Feedback(code));
            }
            None => debug!(target: "Session", "Unrecognised response code {body:?}, ignored"),
        }

        if self.config.rekey_after_response && self.state == SessionState::Authenticated {
            debug!(target: "Session", "Renewing session token after response");
            self.renew_session();
        }

        effects
    }

    pub fn on_reading(&mut self, tag_id: &str) -> Vec<Effect> {
        self.last_reading = Some(tag_id.to_string());

        if self.state != SessionState::Authenticated {
            debug!(target: "Session", "Not authenticated, reading {tag_id} ignored");
            return Vec::new();
        }
        if self.pending.is_some() {
            debug!(target: "Session", "Response pending, reading {tag_id} ignored");
            return Vec::new();
        }
        if self.duplicates.cooling_down(self.config.read_cooldown) {
            debug!(target: "Session", "Read cooldown active, reading {tag_id} ignored");
            return Vec::new();
        }
        if self
            .duplicates
            .is_duplicate(tag_id, self.config.duplicate_window)
        {
            debug!(target: "Session", "Duplicate reading {tag_id} suppressed");
            return Vec::new();
        }
        let Some(token) = self.session.token else {
            warn!(target: "Session", "Authenticated without a session token, restarting");
            self.restart();
            return Vec::new();
        };

        let body = match access::encode_access_body(tag_id, &self.secret, &token) {
            Ok(body) => body,
            Err(e) => {
                error!(target: "Session", "Failed to encrypt reading {tag_id}: {e}");
                return Vec::new();
            }
        };

        info!(target: "Session", "Sending reading {tag_id}");
        let effect = self.publish(Topic::Access, &body);
        self.pending = Some(PendingTransmission {
            tag_id: tag_id.to_string(),
            elapsed: 0,
        });
        self.duplicates.last_sent = Some(tag_id.to_string());
        self.duplicates.mark_exchange();
        vec![effect]
    }

    /// Drops the handshake and session secrets; the next tick sends `init`.
    ///
    /// The only cancellation primitive: a pending transmission is abandoned
    /// with the session that encrypted it, and the last sent reading is
    /// forgotten so the next session may transmit it again.
    pub fn restart(&mut self) {
        self.renew_session();
        self.duplicates.clear();
    }

    /// Starts a new handshake keeping the duplicate filter. Only valid once the
    /// last transmission has been confirmed.
    fn renew_session(&mut self) {
        self.state = SessionState::Uninitialized;
        self.session = Session::default();
        self.ack_wait = 0;
        self.pending = None;
    }

    /// Full reset, as after a device restart.
    pub fn reset(&mut self) {
        self.restart();
        self.unanswered = 0;
        self.duplicates = DuplicateFilter::default();
        self.last_reading = None;
    }

    fn publish(&self, topic: Topic, body: &str) -> Effect {
        Effect::Publish {
            topic,
            payload: encode_frame(&self.device_id, body),
        }
    }
}
