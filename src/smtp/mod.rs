//! ESMTP protocol implementation (RFC 5321/5322).
//!
//! - [`envelope`]: the mail transaction data model
//! - [`line_reader`]: line-oriented framing over the connection stream
//! - [`parser`]: command parsing
//! - [`reply`]: reply formatting
//! - [`session`]: the per-connection state machine
//! - [`server`]: the listener that accepts connections and spawns sessions

pub mod envelope;
pub mod line_reader;
pub mod parser;
pub mod reply;
pub mod server;
pub mod session;

pub use envelope::Envelope;
pub use parser::Command;
pub use server::SmtpServer;
pub use session::SmtpSession;
