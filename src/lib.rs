//! mail-rs: an ESMTP receiver (RFC 5321/5322).
//!
//! The core speaks the wire protocol and the transaction state machine;
//! everything it needs from the outside world is injected as a trait
//! object so the binary can compose storage, authentication, and TLS
//! however a deployment requires:
//!
//! - [`sink::Sink`]: where a fully received message goes
//! - [`security::UserStore`]: how `AUTH` credentials are checked
//! - [`security::TlsProvider`]: how `STARTTLS` is served
//! - [`clock::Clock`]: time, for deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use mail_rs::config::ServerConfig;
//! use mail_rs::clock::SystemClock;
//! use mail_rs::smtp::SmtpServer;
//! use std::sync::Arc;
//!
//! # struct NullSink;
//! # #[async_trait::async_trait]
//! # impl mail_rs::sink::Sink for NullSink {
//! #     async fn deliver(&self, _: &mail_rs::smtp::Envelope, _: &[u8]) -> mail_rs::sink::DeliveryOutcome {
//! #         mail_rs::sink::DeliveryOutcome::Accepted { id: "1".to_string() }
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServerConfig::default());
//!     let server = SmtpServer::new(config, None, None, Arc::new(NullSink), Arc::new(SystemClock));
//!     let (_tx, rx) = tokio::sync::watch::channel(false);
//!     server.run(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod security;
pub mod sink;
pub mod smtp;
pub mod utils;

pub use config::ServerConfig;
pub use error::{Result, SmtpError};
