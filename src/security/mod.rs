//! Security module
//!
//! - [`auth`]: SMTP AUTH mechanisms and the abstract [`auth::UserStore`]
//! - [`rate_limit`]: per-IP sliding-window connection rate limiting
//! - [`tls`]: STARTTLS and the abstract [`tls::TlsProvider`]
//! - [`admission`]: concurrent-session admission control

pub mod admission;
pub mod auth;
pub mod rate_limit;
pub mod tls;

pub use admission::{Admission, AdmissionController};
pub use auth::{AuthMechanism, SqliteUserStore, UserStore, VerifyOutcome};
pub use rate_limit::RateLimiter;
pub use tls::{RustlsTlsProvider, TlsProvider};
