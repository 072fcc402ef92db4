//! Integration tests for the SMTP client against a scripted relay.

#![allow(clippy::unwrap_used)]

mod support;

use base64::{Engine, engine::general_purpose::STANDARD};
use sendgate_smtp::{Credentials, Mechanism, MessageBuilder, SmtpClient};
use support::mock_server::{MockSmtpServer, SmtpCommand};

async fn connect(server: &MockSmtpServer) -> SmtpClient {
    let mut client = SmtpClient::connect(&server.addr().to_string(), "localhost".to_string())
        .await
        .unwrap();
    let greeting = client.read_greeting().await.unwrap();
    assert_eq!(greeting.code, 220);
    client
}

#[tokio::test]
async fn test_ehlo_advertises_auth() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connect(&server).await;

    let ehlo = client.ehlo("sendgate.test").await.unwrap();
    assert!(ehlo.is_success());
    assert_eq!(ehlo.auth_mechanisms(), vec![Mechanism::Plain, Mechanism::Login]);
    assert!(!ehlo.has_extension("STARTTLS"));
    assert!(!client.is_tls());

    server.shutdown();
}

#[tokio::test]
async fn test_auth_plain() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connect(&server).await;
    client.ehlo("sendgate.test").await.unwrap();

    let response = client
        .auth(Mechanism::Plain, &Credentials::new("relay-user", "hunter2"))
        .await
        .unwrap();
    assert_eq!(response.code, 235);

    let commands = server.commands().await;
    let expected = format!("PLAIN {}", STANDARD.encode("\0relay-user\0hunter2"));
    assert!(commands.contains(&SmtpCommand::Auth(expected)));

    server.shutdown();
}

#[tokio::test]
async fn test_auth_login_challenges() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connect(&server).await;
    client.ehlo("sendgate.test").await.unwrap();

    let response = client
        .auth(Mechanism::Login, &Credentials::new("relay-user", "hunter2"))
        .await
        .unwrap();
    assert_eq!(response.code, 235);

    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::Auth("LOGIN".to_string())));
    assert!(commands.contains(&SmtpCommand::AuthContinuation(STANDARD.encode("relay-user"))));
    assert!(commands.contains(&SmtpCommand::AuthContinuation(STANDARD.encode("hunter2"))));

    server.shutdown();
}

#[tokio::test]
async fn test_auth_rejected() {
    let server = MockSmtpServer::builder()
        .with_auth_response(535, "5.7.8 Authentication credentials invalid")
        .build()
        .await
        .unwrap();
    let mut client = connect(&server).await;
    client.ehlo("sendgate.test").await.unwrap();

    let response = client
        .auth(Mechanism::Plain, &Credentials::new("relay-user", "wrong"))
        .await
        .unwrap();
    assert!(response.is_permanent_error());

    server.shutdown();
}

#[tokio::test]
async fn test_full_transaction() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connect(&server).await;

    let message = MessageBuilder::new()
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Integration")
        .html("<p>Hello</p>")
        .attach_named("notes.txt", b"first line\n.second line".to_vec())
        .build()
        .unwrap();

    client.ehlo("sendgate.test").await.unwrap();
    assert!(client.mail_from("sender@example.com").await.unwrap().is_success());
    assert!(client.rcpt_to("recipient@example.com").await.unwrap().is_success());
    assert_eq!(client.data().await.unwrap().code, 354);
    assert!(client.send_data(&message).await.unwrap().is_success());
    assert_eq!(client.quit().await.unwrap().code, 221);

    let commands = server.commands().await;
    assert!(commands.contains(&SmtpCommand::MailFrom("FROM:<sender@example.com>".to_string())));
    assert!(commands.contains(&SmtpCommand::RcptTo("TO:<recipient@example.com>".to_string())));
    assert_eq!(commands.last(), Some(&SmtpCommand::Quit));

    let received = server.messages().await;
    assert_eq!(received.len(), 1);
    assert!(received[0].contains("Subject: Integration\r\n"));
    assert!(received[0].contains("filename=\"notes.txt\""));

    server.shutdown();
}

#[tokio::test]
async fn test_rejected_recipient() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "5.1.1 User unknown")
        .build()
        .await
        .unwrap();
    let mut client = connect(&server).await;

    client.ehlo("sendgate.test").await.unwrap();
    client.mail_from("sender@example.com").await.unwrap();
    let rcpt = client.rcpt_to("nobody@example.com").await.unwrap();

    assert!(rcpt.is_permanent_error());
    assert_eq!(rcpt.message(), "5.1.1 User unknown");

    server.shutdown();
}

#[tokio::test]
async fn test_dropped_connection() {
    let server = MockSmtpServer::builder()
        .with_network_error_after_commands(1)
        .build()
        .await
        .unwrap();
    let mut client = connect(&server).await;

    client.ehlo("sendgate.test").await.unwrap();
    assert!(client.mail_from("sender@example.com").await.is_err());

    server.shutdown();
}
