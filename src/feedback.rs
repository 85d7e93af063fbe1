//! User-facing status signals.
//!
//! On a gate these drive LEDs and a buzzer. The sink is a trait so the
//! runtime can log, blink, or record signals in tests.

use gatecore::protocol::ResponseCode;
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A status code from the peer, or the local ack timeout (504).
    Response(ResponseCode),
    /// The transport is down and a reconnect attempt failed.
    Reconnecting,
}

pub trait FeedbackSink: Send + Sync {
    fn signal(&self, signal: Signal);
}

pub fn describe(code: ResponseCode) -> &'static str {
    match code {
        ResponseCode::Ok => "success",
        ResponseCode::CheckIn => "check-in accepted",
        ResponseCode::CheckOut => "check-out accepted",
        ResponseCode::BadRequest => "bad request",
        ResponseCode::Unauthorized => "tag not authorized",
        ResponseCode::NotFound => "tag not found",
        ResponseCode::Timeout => "timed out waiting for ack",
    }
}

/// Writes every signal to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn signal(&self, signal: Signal) {
        match signal {
            Signal::Response(code) if code.is_success() => {
                info!(target: "Feedback", "[{code}] {}", describe(code));
            }
            Signal::Response(code) => {
                warn!(target: "Feedback", "[{code}] {}", describe(code));
            }
            Signal::Reconnecting => {
                warn!(target: "Feedback", "Transport unavailable, retrying");
            }
        }
    }
}
