mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{start_server_with, user_store_with, Conn};

#[tokio::test]
async fn auth_plain_success_then_mail_from_works() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(|cfg| cfg.allow_plain_without_tls = true, Some(store), None).await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;

    conn.send("EHLO test.client").await;
    let ehlo = conn.read_reply().await;
    assert!(ehlo.iter().any(|l| l.contains("AUTH PLAIN LOGIN")));

    let blob = BASE64.encode(b"\0user@example.com\0secret123");
    conn.send(&format!("AUTH PLAIN {blob}")).await;
    assert!(conn.read_line().await.starts_with("235"));

    conn.send("MAIL FROM:<user@example.com>").await;
    assert!(conn.read_line().await.starts_with("250"));
}

#[tokio::test]
async fn auth_plain_bad_password_is_rejected() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(|cfg| cfg.allow_plain_without_tls = true, Some(store), None).await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;
    conn.send("EHLO test.client").await;
    conn.read_reply().await;

    let blob = BASE64.encode(b"\0user@example.com\0wrongpassword");
    conn.send(&format!("AUTH PLAIN {blob}")).await;
    assert!(conn.read_line().await.starts_with("535"));
}

#[tokio::test]
async fn auth_login_prompts_for_username_then_password() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(|cfg| cfg.allow_plain_without_tls = true, Some(store), None).await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;
    conn.send("EHLO test.client").await;
    conn.read_reply().await;

    conn.send("AUTH LOGIN").await;
    assert!(conn.read_line().await.starts_with("334"));

    conn.send(&BASE64.encode(b"user@example.com")).await;
    assert!(conn.read_line().await.starts_with("334"));

    conn.send(&BASE64.encode(b"secret123")).await;
    assert!(conn.read_line().await.starts_with("235"));
}

#[tokio::test]
async fn cleartext_auth_refused_without_allow_plain_without_tls() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(|_| {}, Some(store), None).await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;
    conn.send("EHLO test.client").await;
    let ehlo = conn.read_reply().await;
    assert!(!ehlo.iter().any(|l| l.contains("AUTH")));

    let blob = BASE64.encode(b"\0user@example.com\0secret123");
    conn.send(&format!("AUTH PLAIN {blob}")).await;
    assert!(conn.read_line().await.starts_with("538"));
}

#[tokio::test]
async fn unsupported_mechanism_is_rejected() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(|cfg| cfg.allow_plain_without_tls = true, Some(store), None).await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;
    conn.send("EHLO test.client").await;
    conn.read_reply().await;

    conn.send("AUTH CRAM-MD5").await;
    assert!(conn.read_line().await.starts_with("504"));
}

#[tokio::test]
async fn auth_required_blocks_mail_from_until_authenticated() {
    let store = user_store_with("user@example.com", "secret123").await;
    let server = start_server_with(
        |cfg| {
            cfg.allow_plain_without_tls = true;
            cfg.auth_required = true;
        },
        Some(store),
        None,
    )
    .await;
    let mut conn = Conn::connect(server.addr).await;
    conn.read_line().await;
    conn.send("EHLO test.client").await;
    conn.read_reply().await;

    conn.send("MAIL FROM:<sender@example.com>").await;
    assert!(conn.read_line().await.starts_with("530"));

    let blob = BASE64.encode(b"\0user@example.com\0secret123");
    conn.send(&format!("AUTH PLAIN {blob}")).await;
    assert!(conn.read_line().await.starts_with("235"));

    conn.send("MAIL FROM:<user@example.com>").await;
    assert!(conn.read_line().await.starts_with("250"));
}
