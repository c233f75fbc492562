//! The `Sink` collaborator contract (C8).
//!
//! The core never writes a message to disk, a database, or a queue itself;
//! it hands the fully-received envelope and body to a `Sink` implementation
//! supplied at construction time. Routing, storage format, virus/spam
//! scanning, and DKIM/SPF policy all live in the composed `Sink`, not here.

use crate::smtp::envelope::Envelope;
use async_trait::async_trait;

/// Outcome of handing a completed message to the sink.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Message accepted; `id` is an opaque identifier echoed in the 250 reply.
    Accepted { id: String },
    /// Permanent failure; mapped to a 5xx reply with the given enhanced code.
    Rejected { enhanced: String, text: String },
    /// Temporary failure; mapped to a 4xx reply with the given enhanced code.
    Deferred { enhanced: String, text: String },
}

/// Acceptor of fully-received messages.
///
/// Implementations must be safe to call concurrently from multiple session
/// tasks; the core places no ordering requirement on deliveries across
/// sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, envelope: &Envelope, body: &[u8]) -> DeliveryOutcome;
}

/// Optional policy hook a composed `Sink` may run before accepting a
/// message (SPF/DKIM/DMARC verification, spam scoring, virus scanning).
///
/// This is intentionally not part of the SMTP core's compiled path: it
/// exists so a `Sink` implementation can plug such checks in without the
/// core knowing about any particular verification scheme.
#[async_trait]
pub trait PostReceptionHook: Send + Sync {
    async fn check(&self, envelope: &Envelope, body: &[u8]) -> HookDecision;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Accept,
    /// Accept but prepend a header (e.g. `Authentication-Results:`) to the body.
    AcceptWithHeader(String),
    Reject { enhanced: String, text: String },
}

/// Maildir-backed [`Sink`]: one message per recipient, written under
/// `base_path/<recipient>/{tmp,new,cur}` (RFC-independent, the de facto
/// Maildir convention).
///
/// A message is written to `tmp` first and atomically renamed into `new`,
/// so a reader never observes a partially-written file. When a message has
/// more than one recipient it is stored once per mailbox; a failure partway
/// through is reported as `Deferred` so the client retries the whole
/// transaction rather than risk silent partial delivery.
pub struct MaildirSink {
    base_path: std::path::PathBuf,
}

impl MaildirSink {
    pub fn new(base_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    async fn store_for(&self, recipient: &str, data: &[u8]) -> std::io::Result<String> {
        let mailbox_path = self.base_path.join(sanitize_recipient(recipient));
        for subdir in &["tmp", "new", "cur"] {
            tokio::fs::create_dir_all(mailbox_path.join(subdir)).await?;
        }

        let filename = generate_filename();
        let tmp_path = mailbox_path.join("tmp").join(&filename);
        let new_path = mailbox_path.join("new").join(&filename);

        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &new_path).await?;
        Ok(filename)
    }
}

/// Maildir filenames are also directory entries; a `/` in the local part
/// would otherwise escape the mailbox directory.
fn sanitize_recipient(recipient: &str) -> String {
    recipient.replace('/', "_")
}

fn generate_filename() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let pid = std::process::id();
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    format!("{timestamp}.{pid}.{hostname}")
}

#[async_trait]
impl Sink for MaildirSink {
    async fn deliver(&self, envelope: &Envelope, body: &[u8]) -> DeliveryOutcome {
        if envelope.forward_paths.is_empty() {
            return DeliveryOutcome::Rejected {
                enhanced: "5.5.0".to_string(),
                text: "no recipients".to_string(),
            };
        }

        let mut ids = Vec::with_capacity(envelope.forward_paths.len());
        for recipient in &envelope.forward_paths {
            match self.store_for(&recipient.address, body).await {
                Ok(filename) => ids.push(filename),
                Err(e) => {
                    tracing::error!(
                        recipient = %recipient.address,
                        error = %e,
                        "failed to write message to maildir"
                    );
                    return DeliveryOutcome::Deferred {
                        enhanced: "4.3.0".to_string(),
                        text: "local storage error, please retry".to_string(),
                    };
                }
            }
        }
        DeliveryOutcome::Accepted { id: ids.join(",") }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory sink for tests: records every delivered message and always
    /// accepts, unless configured to reject/defer.
    #[derive(Default)]
    pub struct RecordingSink {
        pub delivered: Mutex<Vec<(Envelope, Vec<u8>)>>,
        pub outcome: Option<DeliveryOutcome>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_outcome(outcome: DeliveryOutcome) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                outcome: Some(outcome),
            }
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn deliver(&self, envelope: &Envelope, body: &[u8]) -> DeliveryOutcome {
            self.delivered
                .lock()
                .unwrap()
                .push((envelope.clone(), body.to_vec()));
            match &self.outcome {
                Some(o) => o.clone(),
                None => DeliveryOutcome::Accepted {
                    id: format!("test-{}", self.delivered.lock().unwrap().len()),
                },
            }
        }
    }
}
