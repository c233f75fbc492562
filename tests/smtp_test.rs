//! Black-box send tests using a real SMTP client library against an
//! in-process server, in the style of a mail-sending smoke test.

mod common;

use common::start_server;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

fn transport(port: u16) -> SmtpTransport {
    SmtpTransport::builder_dangerous("127.0.0.1")
        .port(port)
        .timeout(Some(Duration::from_secs(5)))
        .build()
}

#[tokio::test]
async fn sends_and_stores_a_plain_text_email() {
    let server = start_server(|_| {}).await;
    let mailer = transport(server.addr.port());

    let email = Message::builder()
        .from("sender@example.com".parse().unwrap())
        .to("recipient@example.com".parse().unwrap())
        .subject("Test Email from Integration Test")
        .header(ContentType::TEXT_PLAIN)
        .body("This is a test email sent from the integration test suite.".to_string())
        .unwrap();

    mailer.send(&email).expect("email should be sent successfully");

    let new_dir = server.maildir.path().join("recipient@example.com").join("new");
    let entries: Vec<_> = std::fs::read_dir(&new_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn sends_email_with_special_characters() {
    let server = start_server(|_| {}).await;
    let mailer = transport(server.addr.port());

    let email = Message::builder()
        .from("sender@example.com".parse().unwrap())
        .to("recipient@example.com".parse().unwrap())
        .subject("Tëst Émàîl wïth Spéçiâl Chárãctêrs 日本語")
        .header(ContentType::TEXT_PLAIN)
        .body("Body with spécial characters: café, naïve, 你好".to_string())
        .unwrap();

    mailer.send(&email).expect("email with special characters should be sent");
}

#[tokio::test]
async fn sends_email_to_multiple_recipients() {
    let server = start_server(|_| {}).await;
    let mailer = transport(server.addr.port());

    let email = Message::builder()
        .from("sender@example.com".parse().unwrap())
        .to("recipient@example.com".parse().unwrap())
        .cc("cc@example.com".parse().unwrap())
        .subject("Multi-recipient Test")
        .body("Test for multiple recipients".to_string())
        .unwrap();

    mailer.send(&email).expect("multi-recipient email should be sent");

    for mailbox in ["recipient@example.com", "cc@example.com"] {
        let new_dir = server.maildir.path().join(mailbox).join("new");
        let entries: Vec<_> = std::fs::read_dir(&new_dir).unwrap().collect();
        assert_eq!(entries.len(), 1, "expected one delivered copy for {mailbox}");
    }
}
