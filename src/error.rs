use thiserror::Error;

/// Error taxonomy for the SMTP core.
///
/// Each variant carries enough information for [`SmtpError::wire_reply`] to
/// produce the RFC 5321 / RFC 3463 reply the session should send. Parser and
/// state-machine errors are recoverable (the session stays open); framing and
/// admission errors are not (the caller closes the connection after sending
/// the reply).
#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line too long")]
    LineTooLong,

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("bad sequence of commands")]
    BadSequence,

    #[error("command unrecognized: {0}")]
    UnknownVerb(String),

    #[error("unsupported parameter: {0}")]
    UnknownParam(String),

    #[error("declared size exceeds limit")]
    SizeDeclaredOverLimit,

    #[error("message too large")]
    MessageTooLarge,

    #[error("too many recipients")]
    TooManyRecipients,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("cleartext authentication disallowed")]
    AuthCleartextDisallowed,

    #[error("bad credentials")]
    AuthBadCredentials,

    #[error("user store unavailable")]
    AuthUnavailable,

    #[error("TLS not available")]
    TlsUnavailable,

    #[error("TLS required before this command")]
    TlsRequired,

    #[error("authentication required before this command")]
    AuthRequired,

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("timeout")]
    Timeout,

    #[error("server shutting down")]
    Shutdown,

    #[error("too many connections")]
    AdmissionFull,

    #[error("delivery deferred: {0}")]
    SinkDeferred(String),

    #[error("delivery rejected: {0}")]
    SinkRejected(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A basic reply code, an RFC 3463 enhanced status code, and reply text.
#[derive(Debug, Clone, Copy)]
pub struct WireReply {
    pub code: u16,
    pub enhanced: &'static str,
    pub text: &'static str,
}

impl SmtpError {
    /// Whether this error should end the connection after the reply is sent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SmtpError::LineTooLong
                | SmtpError::Timeout
                | SmtpError::Shutdown
                | SmtpError::AdmissionFull
                | SmtpError::ConnectionClosed
                | SmtpError::Io(_)
                | SmtpError::TlsHandshakeFailed(_)
        )
    }

    /// Map this error to the reply the client should receive.
    pub fn wire_reply(&self) -> WireReply {
        match self {
            SmtpError::Io(_) | SmtpError::Internal(_) | SmtpError::Config(_) => WireReply {
                code: 451,
                enhanced: "4.3.0",
                text: "Internal error",
            },
            SmtpError::LineTooLong => WireReply {
                code: 500,
                enhanced: "5.5.2",
                text: "Line too long",
            },
            SmtpError::Malformed(_) => WireReply {
                code: 500,
                enhanced: "5.5.2",
                text: "Syntax error",
            },
            SmtpError::BadSequence => WireReply {
                code: 503,
                enhanced: "5.5.1",
                text: "Bad sequence of commands",
            },
            SmtpError::UnknownVerb(_) => WireReply {
                code: 500,
                enhanced: "5.5.2",
                text: "Command unrecognized",
            },
            SmtpError::UnknownParam(_) => WireReply {
                code: 555,
                enhanced: "5.5.4",
                text: "Unsupported parameter",
            },
            SmtpError::SizeDeclaredOverLimit => WireReply {
                code: 552,
                enhanced: "5.3.4",
                text: "Message size exceeds fixed limit",
            },
            SmtpError::MessageTooLarge => WireReply {
                code: 552,
                enhanced: "5.3.4",
                text: "Message size exceeds fixed limit",
            },
            SmtpError::TooManyRecipients => WireReply {
                code: 452,
                enhanced: "4.5.3",
                text: "Too many recipients",
            },
            SmtpError::RateLimited => WireReply {
                code: 450,
                enhanced: "4.7.0",
                text: "Too many messages from your address, try again later",
            },
            SmtpError::AuthCleartextDisallowed => WireReply {
                code: 538,
                enhanced: "5.7.11",
                text: "Encryption required for requested authentication mechanism",
            },
            SmtpError::AuthBadCredentials => WireReply {
                code: 535,
                enhanced: "5.7.8",
                text: "Authentication credentials invalid",
            },
            SmtpError::AuthUnavailable => WireReply {
                code: 454,
                enhanced: "4.7.0",
                text: "Temporary authentication failure",
            },
            SmtpError::TlsUnavailable => WireReply {
                code: 454,
                enhanced: "5.7.0",
                text: "TLS not available",
            },
            SmtpError::TlsRequired => WireReply {
                code: 530,
                enhanced: "5.7.0",
                text: "Must issue STARTTLS first",
            },
            SmtpError::AuthRequired => WireReply {
                code: 530,
                enhanced: "5.7.0",
                text: "Authentication required",
            },
            SmtpError::TlsHandshakeFailed(_) => WireReply {
                code: 454,
                enhanced: "5.7.0",
                text: "TLS handshake failed",
            },
            SmtpError::Timeout => WireReply {
                code: 421,
                enhanced: "4.4.2",
                text: "Timeout",
            },
            SmtpError::Shutdown => WireReply {
                code: 421,
                enhanced: "4.3.0",
                text: "Server shutting down",
            },
            SmtpError::AdmissionFull => WireReply {
                code: 421,
                enhanced: "4.3.2",
                text: "Too many connections",
            },
            SmtpError::SinkDeferred(_) => WireReply {
                code: 450,
                enhanced: "4.3.0",
                text: "Delivery temporarily deferred",
            },
            SmtpError::SinkRejected(_) => WireReply {
                code: 550,
                enhanced: "5.7.1",
                text: "Delivery rejected",
            },
            SmtpError::ConnectionClosed => WireReply {
                code: 421,
                enhanced: "4.4.2",
                text: "Connection closed",
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SmtpError>;
