//! Shared helpers for the black-box integration suite: spin up a real
//! [`SmtpServer`] on a loopback port and drive it with a raw `TcpStream`.

use mail_rs::clock::SystemClock;
use mail_rs::config::ServerConfig;
use mail_rs::security::{SqliteUserStore, TlsProvider, UserStore};
use mail_rs::sink::MaildirSink;
use mail_rs::smtp::SmtpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct TestServer {
    pub addr: SocketAddr,
    pub maildir: tempfile::TempDir,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start a server with a freshly created Maildir sink and no AUTH/TLS,
/// applying `configure` to the default config before binding.
pub async fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    start_server_with(configure, None, None).await
}

pub async fn start_server_with(
    configure: impl FnOnce(&mut ServerConfig),
    user_store: Option<Arc<dyn UserStore>>,
    tls_provider: Option<Arc<dyn TlsProvider>>,
) -> TestServer {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let maildir = tempfile::tempdir().unwrap();
    let mut cfg = ServerConfig::default();
    cfg.listen_addrs = vec![addr.to_string()];
    configure(&mut cfg);

    let sink = Arc::new(MaildirSink::new(maildir.path()));
    let server = Arc::new(SmtpServer::new(
        Arc::new(cfg),
        user_store,
        tls_provider,
        sink,
        Arc::new(SystemClock),
    ));

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = server.run(rx).await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    TestServer {
        addr,
        maildir,
        shutdown: tx,
    }
}

pub async fn user_store_with(email: &str, password: &str) -> Arc<dyn UserStore> {
    let store = SqliteUserStore::connect("sqlite::memory:").await.unwrap();
    store.create_user(email, password).await.unwrap();
    Arc::new(store)
}

pub struct Conn {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Conn {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    /// Read one full (possibly multi-line) reply: keeps reading while the
    /// separator after the code is `-`.
    pub async fn read_reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let continues = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);
            if !continues {
                break;
            }
        }
        lines
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Write bytes exactly as given, with no `\r\n` appended: for BDAT
    /// chunks and raw pipelined batches.
    pub async fn writer_send_raw(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }
}
