//! The connection-accepting listener (C10).
//!
//! Binds every configured `listen_addr`, applies admission control (C5)
//! to each accepted socket before a session is ever constructed, and
//! spawns one task per admitted connection. Per-IP message rate limiting
//! (C4) is not an accept-time concern here: the shared [`RateLimiter`] is
//! handed to each session and consulted on successful delivery, so it
//! gates accepted messages rather than raw connections. `run` returns
//! once `shutdown` fires and either every in-flight session finishes or
//! `shutdown_grace_period` elapses.

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{Result, SmtpError};
use crate::security::{AdmissionController, RateLimiter, TlsProvider, UserStore};
use crate::sink::Sink;
use crate::smtp::reply;
use crate::smtp::session::SmtpSession;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub struct SmtpServer {
    config: Arc<ServerConfig>,
    user_store: Option<Arc<dyn UserStore>>,
    tls_provider: Option<Arc<dyn TlsProvider>>,
    sink: Arc<dyn Sink>,
    rate_limiter: Arc<RateLimiter>,
    admission: Arc<AdmissionController>,
    clock: Arc<dyn Clock>,
}

impl SmtpServer {
    pub fn new(
        config: Arc<ServerConfig>,
        user_store: Option<Arc<dyn UserStore>>,
        tls_provider: Option<Arc<dyn TlsProvider>>,
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            clock.clone(),
            config.rate_limit_window,
            config.rate_limit_count,
            config.rate_limit_ipv6_prefix,
        ));
        let admission = Arc::new(AdmissionController::new(config.max_conns));
        Self {
            config,
            user_store,
            tls_provider,
            sink,
            rate_limiter,
            admission,
            clock,
        }
    }

    /// Serve every `listen_addr` until `shutdown` carries `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut listeners = Vec::new();
        for addr in &self.config.listen_addrs {
            let listener = TcpListener::bind(addr).await?;
            info!(addr, "listening");
            listeners.push(listener);
        }
        if listeners.is_empty() {
            return Err(SmtpError::Config("no listen_addrs configured".to_string()));
        }

        if self.tls_provider.is_some() {
            info!("STARTTLS support enabled");
        }
        if self.user_store.is_some() {
            info!(required = self.config.auth_required, "AUTH support enabled (PLAIN, LOGIN)");
        }

        let sessions = Arc::new(Mutex::new(JoinSet::new()));
        let mut accept_tasks = JoinSet::new();

        for listener in listeners {
            let config = self.config.clone();
            let user_store = self.user_store.clone();
            let tls_provider = self.tls_provider.clone();
            let sink = self.sink.clone();
            let rate_limiter = self.rate_limiter.clone();
            let admission = self.admission.clone();
            let clock = self.clock.clone();
            let sessions = sessions.clone();
            let mut shutdown_rx = shutdown.clone();

            accept_tasks.spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => return,
                        accepted = listener.accept() => {
                            let (mut socket, addr) = match accepted {
                                Ok(pair) => pair,
                                Err(e) => {
                                    warn!(error = %e, "accept failed");
                                    continue;
                                }
                            };

                            let Some(admission_guard) = admission.try_admit() else {
                                warn!(%addr, current = admission.current(), "connection refused: at capacity");
                                let _ = socket
                                    .write_all(reply::from_error(&SmtpError::AdmissionFull).as_bytes())
                                    .await;
                                continue;
                            };

                            info!(%addr, "connection accepted");
                            let session = SmtpSession::new(
                                config.clone(),
                                user_store.clone(),
                                tls_provider.clone(),
                                sink.clone(),
                                clock.clone(),
                                rate_limiter.clone(),
                                addr,
                            );

                            sessions.lock().await.spawn(async move {
                                let _admission_guard = admission_guard;
                                if let Err(e) = session.handle(socket).await {
                                    error!(%addr, error = %e, "session error");
                                }
                            });
                        }
                    }
                }
            });
        }

        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!("shutdown signal received, draining in-flight sessions");

        while accept_tasks.join_next().await.is_some() {}

        let drain = async {
            let mut guard = sessions.lock().await;
            while guard.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_grace_period, drain)
            .await
            .is_err()
        {
            warn!("shutdown grace period elapsed with sessions still active");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::sink::test_support::RecordingSink;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepts_connections_and_shuts_down_gracefully() {
        // Bind first to learn the ephemeral port, then re-run through the
        // server's own `run` with that fixed address.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let mut cfg = ServerConfig::default();
        cfg.listen_addrs = vec![addr.to_string()];
        cfg.shutdown_grace_period = Duration::from_millis(200);
        let server = Arc::new(SmtpServer::new(
            Arc::new(cfg),
            None,
            None,
            Arc::new(RecordingSink::new()),
            Arc::new(SystemClock),
        ));

        let (tx, rx) = watch::channel(false);
        let server_clone = server.clone();
        let handle = tokio::spawn(async move { server_clone.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"));

        client.write_all(b"QUIT\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("221"));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        let _ = server;
    }
}
