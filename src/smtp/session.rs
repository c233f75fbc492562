//! The per-connection SMTP state machine (C9).
//!
//! One [`SmtpSession`] is spawned per accepted connection. It owns the
//! transaction state, drives [`LineReader`] for framing, dispatches parsed
//! [`Command`]s, and hands completed messages to the configured [`Sink`].
//! TLS upgrade and AUTH are the two points where the command loop needs to
//! do more than parse-dispatch-reply: STARTTLS replaces the underlying
//! stream mid-session, and AUTH drives its own challenge/response
//! continuation lines.

use crate::clock::Clock;
use crate::config::{ServerConfig, TlsMode};
use crate::error::{Result, SmtpError};
use crate::security::auth::{decode_login_credential, decode_plain_auth, AuthMechanism};
use crate::security::{RateLimiter, TlsProvider, UserStore, VerifyOutcome};
use crate::sink::{DeliveryOutcome, Sink};
use crate::smtp::envelope::{BodyType, Envelope, Recipient};
use crate::smtp::line_reader::LineReader;
use crate::smtp::parser::Command;
use crate::smtp::reply;
use crate::utils::validate_mailbox;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The transport a session is currently speaking over. `Upgrading` is a
/// transient placeholder occupying the slot for the instant between taking
/// ownership of the plaintext `TcpStream` and handing back the wrapped
/// `TlsStream`; it is never read from or written to.
pub enum SmtpStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    Upgrading,
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            SmtpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            SmtpStream::Upgrading => unreachable!("stream read while mid-upgrade"),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            SmtpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            SmtpStream::Upgrading => unreachable!("stream written while mid-upgrade"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            SmtpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            SmtpStream::Upgrading => unreachable!("stream flushed while mid-upgrade"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            SmtpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            SmtpStream::Upgrading => unreachable!("stream shut down while mid-upgrade"),
        }
    }
}

/// Where a session sits in the RFC 5321 transaction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Banner sent, no HELO/EHLO yet.
    Greeted,
    HeloReceived,
    MailReceived,
    RcptReceived,
    /// Mid-`DATA`; only reachable transiently inside `handle_data`.
    Data,
    /// At least one `BDAT` chunk received, more may follow.
    Bdat,
    Quit,
}

/// What the command loop should do once [`SmtpSession::run`] returns.
enum SessionOutcome {
    /// The stream was replaced (STARTTLS); re-enter the command loop on it.
    Restart,
    Quit,
}

enum StarttlsOutcome {
    Proceed(Arc<dyn TlsProvider>),
    Handled,
}

pub struct SmtpSession {
    config: Arc<ServerConfig>,
    user_store: Option<Arc<dyn UserStore>>,
    tls_provider: Option<Arc<dyn TlsProvider>>,
    sink: Arc<dyn Sink>,
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    conn_id: String,
    client_addr: SocketAddr,
    state: SmtpState,
    tls_active: bool,
    extended: bool,
    authenticated_user: Option<String>,
    envelope: Envelope,
    bdat_accum: Vec<u8>,
}

impl SmtpSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        user_store: Option<Arc<dyn UserStore>>,
        tls_provider: Option<Arc<dyn TlsProvider>>,
        sink: Arc<dyn Sink>,
        clock: Arc<dyn Clock>,
        rate_limiter: Arc<RateLimiter>,
        client_addr: SocketAddr,
    ) -> Self {
        Self {
            config,
            user_store,
            tls_provider,
            sink,
            clock,
            rate_limiter,
            conn_id: Uuid::new_v4().to_string(),
            client_addr,
            state: SmtpState::Greeted,
            tls_active: false,
            extended: false,
            authenticated_user: None,
            envelope: Envelope::default(),
            bdat_accum: Vec::new(),
        }
    }

    /// Drive this session to completion over an accepted TCP stream.
    pub async fn handle(mut self, stream: TcpStream) -> Result<()> {
        info!(conn_id = %self.conn_id, peer = %self.client_addr, "session started");
        let mut stream = SmtpStream::Plain(stream);
        let greeting = reply::single(220, None, &format!("{} ESMTP Service Ready", self.config.hostname));
        stream.write_all(greeting.as_bytes()).await?;
        stream.flush().await?;

        loop {
            match self.run(&mut stream).await {
                Ok(SessionOutcome::Restart) => continue,
                Ok(SessionOutcome::Quit) => break,
                Err(e) => {
                    let _ = stream.write_all(reply::from_error(&e).as_bytes()).await;
                    let _ = stream.flush().await;
                    warn!(conn_id = %self.conn_id, error = %e, "session ended on error");
                    break;
                }
            }
        }
        info!(conn_id = %self.conn_id, "session ended");
        Ok(())
    }

    async fn run(&mut self, stream: &mut SmtpStream) -> Result<SessionOutcome> {
        let mut reader = LineReader::new(&mut *stream, self.config.max_line_length);
        let mut pending = String::new();

        loop {
            let line = reader.read_line(self.config.idle_timeout).await?;

            let cmd = match Command::parse(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    pending.push_str(&reply::from_error(&e));
                    reader.write_all(pending.as_bytes()).await?;
                    reader.flush().await?;
                    pending.clear();
                    continue;
                }
            };

            if matches!(cmd, Command::Starttls) {
                if !pending.is_empty() {
                    reader.write_all(pending.as_bytes()).await?;
                    reader.flush().await?;
                    pending.clear();
                }
                match self.try_starttls(&mut reader).await? {
                    StarttlsOutcome::Handled => continue,
                    StarttlsOutcome::Proceed(provider) => {
                        drop(reader);
                        self.perform_tls_handshake(stream, provider).await?;
                        return Ok(SessionOutcome::Restart);
                    }
                }
            }

            if let Command::Auth { mechanism, initial_response } = cmd {
                if !pending.is_empty() {
                    reader.write_all(pending.as_bytes()).await?;
                    reader.flush().await?;
                    pending.clear();
                }
                let text = self.handle_auth(&mut reader, mechanism, initial_response).await?;
                reader.write_all(text.as_bytes()).await?;
                reader.flush().await?;
                continue;
            }

            let pipelinable = cmd.is_pipelinable();
            let quitting = matches!(cmd, Command::Quit);
            let reply_text = match self.dispatch(cmd, &mut reader).await {
                Ok(text) => text,
                Err(e) => {
                    let fatal = e.is_fatal();
                    let text = reply::from_error(&e);
                    if fatal {
                        reader.write_all(text.as_bytes()).await?;
                        reader.flush().await?;
                        return Err(e);
                    }
                    text
                }
            };
            pending.push_str(&reply_text);

            if !pipelinable || !reader.has_buffered_line() {
                reader.write_all(pending.as_bytes()).await?;
                reader.flush().await?;
                pending.clear();
            }

            if quitting {
                return Ok(SessionOutcome::Quit);
            }
        }
    }

    async fn dispatch(
        &mut self,
        cmd: Command,
        reader: &mut LineReader<&mut SmtpStream>,
    ) -> Result<String> {
        match cmd {
            Command::Helo(domain) => {
                self.extended = false;
                self.state = SmtpState::HeloReceived;
                debug!(conn_id = %self.conn_id, %domain, "HELO");
                Ok(reply::single(250, None, &format!("{} Hello {domain}", self.config.hostname)))
            }
            Command::Ehlo(domain) => {
                self.extended = true;
                self.state = SmtpState::HeloReceived;
                debug!(conn_id = %self.conn_id, %domain, "EHLO");
                Ok(self.ehlo_reply(&domain))
            }
            Command::MailFrom { reverse_path, params } => self.handle_mail_from(reverse_path, params),
            Command::RcptTo { forward_path, params } => self.handle_rcpt_to(forward_path, params),
            Command::Data => self.handle_data(reader).await,
            Command::Bdat { size, last } => self.handle_bdat(reader, size, last).await,
            Command::Rset => {
                self.reset_envelope();
                if self.state != SmtpState::Greeted {
                    self.state = SmtpState::HeloReceived;
                }
                Ok(reply::single(250, Some("2.0.0"), "OK"))
            }
            Command::Noop => Ok(reply::single(250, Some("2.0.0"), "OK")),
            Command::Quit => {
                self.state = SmtpState::Quit;
                Ok(reply::single(221, Some("2.0.0"), &format!("{} closing connection", self.config.hostname)))
            }
            Command::Vrfy | Command::Expn => {
                Ok(reply::single(252, Some("2.1.5"), "Cannot verify user"))
            }
            Command::Starttls | Command::Auth { .. } => {
                unreachable!("handled in the command loop before dispatch")
            }
        }
    }

    fn ehlo_reply(&self, domain: &str) -> String {
        let mut lines = vec![format!("{} Hello {domain}", self.config.hostname)];
        lines.push(format!("SIZE {}", self.config.max_message_size));
        lines.push("8BITMIME".to_string());
        lines.push("PIPELINING".to_string());
        lines.push("ENHANCEDSTATUSCODES".to_string());
        lines.push("SMTPUTF8".to_string());
        lines.push("CHUNKING".to_string());
        lines.push("DSN".to_string());
        if self.tls_provider.is_some() && !self.tls_active && self.config.tls_mode != TlsMode::Disabled {
            lines.push("STARTTLS".to_string());
        }
        if self.user_store.is_some() && (self.tls_active || self.config.allow_plain_without_tls) {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }
        lines.push("HELP".to_string());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        reply::multi(250, &refs)
    }

    fn require_tls_if_mandated(&self) -> Result<()> {
        if self.config.tls_mode == TlsMode::StarttlsRequired && !self.tls_active {
            return Err(SmtpError::TlsRequired);
        }
        Ok(())
    }

    fn require_auth_if_mandated(&self) -> Result<()> {
        if self.config.auth_required && self.authenticated_user.is_none() {
            return Err(SmtpError::AuthRequired);
        }
        Ok(())
    }

    fn handle_mail_from(&mut self, reverse_path: String, params: crate::smtp::parser::MailParams) -> Result<String> {
        if self.state != SmtpState::HeloReceived {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        self.require_tls_if_mandated()?;
        self.require_auth_if_mandated()?;
        if let Some(size) = params.size {
            if size > self.config.max_message_size {
                return Ok(reply::from_error(&SmtpError::SizeDeclaredOverLimit));
            }
        }
        validate_mailbox(&reverse_path, params.smtputf8)?;

        let mut envelope = Envelope::new(reverse_path);
        envelope.declared_size = params.size;
        envelope.body_type = params.body.unwrap_or_default();
        envelope.smtputf8 = params.smtputf8;
        envelope.dsn_envid = params.envid;
        envelope.dsn_ret = params.ret;
        envelope.deliver_by = params.deliver_by;
        self.envelope = envelope;
        self.state = SmtpState::MailReceived;
        Ok(reply::single(250, Some("2.1.0"), "OK"))
    }

    fn handle_rcpt_to(&mut self, forward_path: String, params: crate::smtp::parser::RcptParams) -> Result<String> {
        if !matches!(self.state, SmtpState::MailReceived | SmtpState::RcptReceived) {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        if self.envelope.forward_paths.len() >= self.config.max_recipients {
            return Ok(reply::from_error(&SmtpError::TooManyRecipients));
        }
        validate_mailbox(&forward_path, self.envelope.smtputf8)?;

        let mut recipient = Recipient::new(forward_path);
        recipient.notify = params.notify;
        recipient.orcpt = params.orcpt;
        self.envelope.forward_paths.push(recipient);
        self.state = SmtpState::RcptReceived;
        Ok(reply::single(250, Some("2.1.5"), "OK"))
    }

    async fn handle_data(&mut self, reader: &mut LineReader<&mut SmtpStream>) -> Result<String> {
        if self.state != SmtpState::RcptReceived {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        if self.envelope.body_type == BodyType::BinaryMime {
            // BINARYMIME requires CHUNKING (BDAT), never DATA.
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }

        reader
            .write_all(reply::single(354, None, "Start mail input; end with <CRLF>.<CRLF>").as_bytes())
            .await?;
        reader.flush().await?;
        self.state = SmtpState::Data;

        let body = match reader.read_body_dot(self.config.data_timeout, self.config.max_message_size).await {
            Ok(body) => body,
            Err(SmtpError::MessageTooLarge) => {
                self.reset_envelope();
                self.state = SmtpState::Greeted;
                return Ok(reply::from_error(&SmtpError::MessageTooLarge));
            }
            Err(e) => return Err(e),
        };
        Ok(self.deliver(body).await)
    }

    async fn handle_bdat(
        &mut self,
        reader: &mut LineReader<&mut SmtpStream>,
        size: usize,
        last: bool,
    ) -> Result<String> {
        if !matches!(self.state, SmtpState::MailReceived | SmtpState::RcptReceived | SmtpState::Bdat) {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        if self.envelope.forward_paths.is_empty() {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        if self.bdat_accum.len() + size > self.config.max_message_size {
            self.reset_envelope();
            self.state = SmtpState::Greeted;
            return Ok(reply::from_error(&SmtpError::MessageTooLarge));
        }

        let chunk = reader.read_octets(size, self.config.data_timeout).await?;
        self.bdat_accum.extend_from_slice(&chunk);
        self.state = SmtpState::Bdat;

        if last {
            let body = std::mem::take(&mut self.bdat_accum);
            Ok(self.deliver(body).await)
        } else {
            Ok(reply::single(250, Some("2.0.0"), &format!("{size} octets received")))
        }
    }

    /// Hand a fully received body to the sink, resetting the transaction
    /// regardless of outcome. Gated by the per-IP message rate limiter:
    /// this runs once per accepted message (DATA or BDAT LAST), not per
    /// connection, so a client that only opens connections without
    /// sending mail never burns its own quota.
    async fn deliver(&mut self, body: Vec<u8>) -> String {
        if !self.rate_limiter.check(&self.client_addr.ip()).await {
            self.reset_envelope();
            self.state = SmtpState::Greeted;
            return reply::from_error(&SmtpError::RateLimited);
        }

        let outcome = self.sink.deliver(&self.envelope, &body).await;
        self.reset_envelope();
        self.state = SmtpState::Greeted;

        match outcome {
            DeliveryOutcome::Accepted { id } => {
                info!(conn_id = %self.conn_id, id, "message accepted");
                reply::single(250, Some("2.0.0"), &format!("Message accepted: {id}"))
            }
            DeliveryOutcome::Rejected { enhanced, text } => reply::single(550, Some(&enhanced), &text),
            DeliveryOutcome::Deferred { enhanced, text } => reply::single(450, Some(&enhanced), &text),
        }
    }

    fn reset_envelope(&mut self) {
        self.envelope = Envelope::default();
        self.bdat_accum.clear();
    }

    async fn try_starttls(&mut self, reader: &mut LineReader<&mut SmtpStream>) -> Result<StarttlsOutcome> {
        let Some(provider) = self.tls_provider.clone() else {
            reader.write_all(reply::from_error(&SmtpError::TlsUnavailable).as_bytes()).await?;
            reader.flush().await?;
            return Ok(StarttlsOutcome::Handled);
        };
        if self.config.tls_mode == TlsMode::Disabled {
            reader.write_all(reply::from_error(&SmtpError::TlsUnavailable).as_bytes()).await?;
            reader.flush().await?;
            return Ok(StarttlsOutcome::Handled);
        }
        if self.tls_active {
            reader.write_all(reply::single(503, Some("5.5.1"), "Already using TLS").as_bytes()).await?;
            reader.flush().await?;
            return Ok(StarttlsOutcome::Handled);
        }
        if !matches!(self.state, SmtpState::Greeted | SmtpState::HeloReceived) {
            reader.write_all(reply::from_error(&SmtpError::BadSequence).as_bytes()).await?;
            reader.flush().await?;
            return Ok(StarttlsOutcome::Handled);
        }

        reader.write_all(reply::single(220, None, "Ready to start TLS").as_bytes()).await?;
        reader.flush().await?;
        Ok(StarttlsOutcome::Proceed(provider))
    }

    async fn perform_tls_handshake(
        &mut self,
        stream: &mut SmtpStream,
        provider: Arc<dyn TlsProvider>,
    ) -> Result<()> {
        let tcp = match std::mem::replace(stream, SmtpStream::Upgrading) {
            SmtpStream::Plain(tcp) => tcp,
            other => {
                *stream = other;
                return Err(SmtpError::Internal("STARTTLS attempted on a non-plain stream".to_string()));
            }
        };

        let acceptor = provider.acceptor();
        let tls_stream = match acceptor.accept(tcp).await {
            Ok(s) => s,
            Err(e) => return Err(SmtpError::TlsHandshakeFailed(e.to_string())),
        };
        *stream = SmtpStream::Tls(Box::new(tls_stream));

        // RFC 3207 §4.2: discard all prior session state on a successful upgrade.
        self.tls_active = true;
        self.state = SmtpState::Greeted;
        self.extended = false;
        self.authenticated_user = None;
        self.reset_envelope();
        info!(conn_id = %self.conn_id, "TLS established");
        Ok(())
    }

    async fn handle_auth(
        &mut self,
        reader: &mut LineReader<&mut SmtpStream>,
        mechanism: String,
        initial_response: Option<String>,
    ) -> Result<String> {
        let Some(store) = self.user_store.clone() else {
            return Ok(reply::single(502, None, "AUTH not available"));
        };
        if self.authenticated_user.is_some() {
            return Ok(reply::single(503, Some("5.5.1"), "Already authenticated"));
        }
        if self.state != SmtpState::HeloReceived {
            return Ok(reply::from_error(&SmtpError::BadSequence));
        }
        if !(self.tls_active || self.config.allow_plain_without_tls) {
            return Ok(reply::from_error(&SmtpError::AuthCleartextDisallowed));
        }
        let Some(mech) = AuthMechanism::from_str(&mechanism) else {
            return Ok(reply::single(504, Some("5.5.4"), "Authentication mechanism not supported"));
        };

        let (username, password) = match mech {
            AuthMechanism::Plain => {
                let blob = match initial_response {
                    Some(data) => data,
                    None => {
                        reader.write_all(reply::single(334, None, "").as_bytes()).await?;
                        reader.flush().await?;
                        reader.read_line(self.config.idle_timeout).await?
                    }
                };
                decode_plain_auth(&blob)?
            }
            AuthMechanism::Login => {
                let username = match initial_response {
                    Some(u) => decode_login_credential(&u)?,
                    None => {
                        reader.write_all(reply::single(334, None, "VXNlcm5hbWU6").as_bytes()).await?;
                        reader.flush().await?;
                        let line = reader.read_line(self.config.idle_timeout).await?;
                        decode_login_credential(&line)?
                    }
                };
                reader.write_all(reply::single(334, None, "UGFzc3dvcmQ6").as_bytes()).await?;
                reader.flush().await?;
                let line = reader.read_line(self.config.idle_timeout).await?;
                let password = decode_login_credential(&line)?;
                (username, password)
            }
        };

        match store.verify(&username, &password).await {
            VerifyOutcome::Verified => {
                info!(conn_id = %self.conn_id, %username, "authenticated");
                self.authenticated_user = Some(username);
                Ok(reply::single(235, Some("2.7.0"), "Authentication successful"))
            }
            VerifyOutcome::BadCredentials => Ok(reply::from_error(&SmtpError::AuthBadCredentials)),
            VerifyOutcome::Unavailable => Ok(reply::from_error(&SmtpError::AuthUnavailable)),
        }
    }
}
