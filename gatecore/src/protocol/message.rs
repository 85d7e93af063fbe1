//! Topics, payload framing and the fixed bodies exchanged with the peer.
//!
//! Every payload on every topic is ASCII text of the form
//! `<deviceId>###<body>`.

use std::fmt;

/// Separator between the device id and the message body.
pub const FRAME_SEPARATOR: &str = "###";

/// Body of the `init` message.
pub const INIT_BODY: &str = "INIT";

/// Length of the session token issued by the peer.
pub const SESSION_TOKEN_LEN: usize = 16;

pub const SESSION_EXPIRED: &str = "sessionExpired";
pub const AUTHENTICATION_FAILED: &str = "authenticationFailed";
pub const NOT_AUTHENTICATED: &str = "notAuthenticated";
pub const AUTHENTICATION_SUCCESSFUL: &str = "authenticationSuccessful";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Outbound session bootstrap.
    Init,
    /// Inbound handshake verdicts and session tokens.
    Ack,
    /// Outbound authentication code.
    Hmac,
    /// Outbound encrypted readings.
    Access,
    /// Inbound status codes for a reading.
    Response,
}

impl Topic {
    /// Topics the device subscribes to.
    pub const INBOUND: [Topic; 2] = [Topic::Response, Topic::Ack];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Init => "init",
            Topic::Ack => "ack",
            Topic::Hmac => "hmac",
            Topic::Access => "access",
            Topic::Response => "response",
        }
    }

    pub fn parse(topic: &str) -> Option<Self> {
        match topic {
            "init" => Some(Topic::Init),
            "ack" => Some(Topic::Ack),
            "hmac" => Some(Topic::Hmac),
            "access" => Some(Topic::Access),
            "response" => Some(Topic::Response),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded `<deviceId>###<body>` payload borrowing from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub device_id: &'a str,
    pub body: &'a str,
}

pub fn encode_frame(device_id: &str, body: &str) -> String {
    let mut out = String::with_capacity(device_id.len() + FRAME_SEPARATOR.len() + body.len());
    out.push_str(device_id);
    out.push_str(FRAME_SEPARATOR);
    out.push_str(body);
    out
}

/// Splits on the first separator. Non-UTF-8 payloads and payloads without a
/// separator yield `None`.
pub fn parse_frame(payload: &[u8]) -> Option<Frame<'_>> {
    let text = std::str::from_utf8(payload).ok()?;
    let (device_id, body) = text.split_once(FRAME_SEPARATOR)?;
    Some(Frame { device_id, body })
}

/// Body of an inbound `ack` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckBody {
    SessionExpired,
    AuthenticationFailed,
    NotAuthenticated,
    AuthenticationSuccessful,
    /// A fresh session token.
    Token([u8; SESSION_TOKEN_LEN]),
    /// Anything else.
    Unidentified(String),
}

impl AckBody {
    pub fn parse(body: &str) -> Self {
        // Control strings are matched before the length rule: `notAuthenticated`
        // is itself 16 bytes long.
        match body {
            SESSION_EXPIRED => AckBody::SessionExpired,
            AUTHENTICATION_FAILED => AckBody::AuthenticationFailed,
            NOT_AUTHENTICATED => AckBody::NotAuthenticated,
            AUTHENTICATION_SUCCESSFUL => AckBody::AuthenticationSuccessful,
            other => match <[u8; SESSION_TOKEN_LEN]>::try_from(other.as_bytes()) {
                Ok(token) => AckBody::Token(token),
                Err(_) => AckBody::Unidentified(other.to_string()),
            },
        }
    }

    /// Control strings that send the handshake back to the start.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AckBody::SessionExpired | AckBody::AuthenticationFailed | AckBody::NotAuthenticated
        )
    }
}

/// Recognised status codes on the `response` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// 200: success, internal.
    Ok,
    /// 201: success, check-in.
    CheckIn,
    /// 202: success, check-out.
    CheckOut,
    /// 400
    BadRequest,
    /// 401
    Unauthorized,
    /// 404: no record for this tag.
    NotFound,
    /// 504: timed out waiting for an acknowledgment.
    Timeout,
}

impl ResponseCode {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(ResponseCode::Ok),
            201 => Some(ResponseCode::CheckIn),
            202 => Some(ResponseCode::CheckOut),
            400 => Some(ResponseCode::BadRequest),
            401 => Some(ResponseCode::Unauthorized),
            404 => Some(ResponseCode::NotFound),
            504 => Some(ResponseCode::Timeout),
            _ => None,
        }
    }

    /// Parses a decimal body; unknown or malformed codes yield `None`.
    pub fn parse(body: &str) -> Option<Self> {
        body.trim().parse::<u16>().ok().and_then(Self::from_code)
    }

    pub fn code(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::CheckIn => 201,
            ResponseCode::CheckOut => 202,
            ResponseCode::BadRequest => 400,
            ResponseCode::Unauthorized => 401,
            ResponseCode::NotFound => 404,
            ResponseCode::Timeout => 504,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResponseCode::Ok | ResponseCode::CheckIn | ResponseCode::CheckOut
        )
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
