//! Mock SMTP relay for client and dispatch tests
//!
//! The server can:
//! - Answer every command with a configurable reply
//! - Run `AUTH PLAIN` and the `AUTH LOGIN` challenge exchange
//! - Drop or stall the connection after N commands
//! - Record every command and message body for assertions
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_auth_response(535, "Authentication credentials invalid")
//!     .build()
//!     .await?;
//!
//! // Point a relay at server.addr() and assert on server.commands()
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

// Shared by several test crates, each using a subset
#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// The full `AUTH` argument, mechanism and optional initial response
    Auth(String),
    /// A line sent in answer to a `334` challenge
    AuthContinuation(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), with the terminating dot removed
    MessageContent(Vec<u8>),
    Quit,
    StartTls,
    Other(String),
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_code: u16,
    capabilities: Vec<String>,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,

    response_delay: Option<Duration>,
    drop_after_commands: Option<usize>,
    timeout_on_command: Option<usize>,
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, cap) in self.capabilities.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(&mut response, "{}{separator}{cap}\r\n", self.ehlo_code);
        }

        response.into_bytes()
    }
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_code: 250,
            capabilities: vec![
                "localhost".to_string(),
                "SIZE 10000000".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
            ],
            auth_response: SmtpResponse::new(235, "Authentication succeeded"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            response_delay: None,
            drop_after_commands: None,
            timeout_on_command: None,
        }
    }
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

type Reader<'a> = BufReader<tokio::net::tcp::ReadHalf<'a>>;
type Writer<'a> = tokio::net::tcp::WriteHalf<'a>;

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// All commands received so far, across connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Message bodies received so far
    pub async fn messages(&self) -> Vec<String> {
        self.commands_received
            .read()
            .await
            .iter()
            .filter_map(|cmd| match cmd {
                SmtpCommand::MessageContent(data) => Some(String::from_utf8_lossy(data).into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Number of accepted connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn reply(
        writer: &mut Writer<'_>,
        config: &MockServerConfig,
        bytes: &[u8],
    ) -> std::io::Result<()> {
        if let Some(delay) = config.response_delay {
            tokio::time::sleep(delay).await;
        }
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn read_line(reader: &mut Reader<'_>, line: &mut String) -> std::io::Result<usize> {
        line.clear();
        match timeout(Duration::from_secs(10), reader.read_line(line)).await {
            Ok(read) => read,
            Err(_) => Ok(0),
        }
    }

    /// Runs the `AUTH` exchange; returns `false` if the client went away.
    async fn authenticate(
        argument: &str,
        reader: &mut Reader<'_>,
        writer: &mut Writer<'_>,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
    ) -> std::io::Result<bool> {
        let mechanism = argument.split(' ').next().unwrap_or_default();
        let has_initial = argument.contains(' ');

        if mechanism.eq_ignore_ascii_case("LOGIN") && !has_initial {
            let mut line = String::new();
            // "Username:" then "Password:"
            for challenge in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                Self::reply(writer, config, format!("334 {challenge}\r\n").as_bytes()).await?;
                if Self::read_line(reader, &mut line).await? == 0 {
                    return Ok(false);
                }
                let answer = line.trim().to_string();
                commands
                    .write()
                    .await
                    .push(SmtpCommand::AuthContinuation(answer.clone()));
                if answer == "*" {
                    Self::reply(writer, config, b"501 Authentication cancelled\r\n").await?;
                    return Ok(true);
                }
            }
        } else if !mechanism.eq_ignore_ascii_case("PLAIN") {
            Self::reply(writer, config, b"504 Unrecognized authentication type\r\n").await?;
            return Ok(true);
        }

        Self::reply(writer, config, &config.auth_response.to_bytes()).await?;
        Ok(true)
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut local_command_count = 0;

        Self::reply(&mut writer, &config, &config.greeting.to_bytes()).await?;

        loop {
            if let Some(drop_after) = config.drop_after_commands
                && local_command_count >= drop_after
            {
                return Ok(());
            }

            if let Some(timeout_on) = config.timeout_on_command
                && local_command_count == timeout_on
            {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            if Self::read_line(&mut reader, &mut line).await? == 0 {
                return Ok(());
            }
            local_command_count += 1;

            let cmd_line = line.trim().to_string();
            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line.as_str(), ""));

            let (response, command) = match verb.to_uppercase().as_str() {
                "EHLO" => (config.ehlo_bytes(), SmtpCommand::Ehlo(argument.to_string())),
                "HELO" => (
                    SmtpResponse::new(250, "Hello").to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "AUTH" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(argument.to_string()));
                    if !Self::authenticate(argument, &mut reader, &mut writer, &config, &commands)
                        .await?
                    {
                        return Ok(());
                    }
                    continue;
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to_response.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    Self::reply(&mut writer, &config, &config.quit_response.to_bytes()).await?;
                    return Ok(());
                }
                "STARTTLS" => (
                    SmtpResponse::new(502, "Command not implemented").to_bytes(),
                    SmtpCommand::StartTls,
                ),
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);
            Self::reply(&mut writer, &config, &response).await?;

            if is_data && config.data_response.code == 354 {
                let mut content = Vec::new();

                loop {
                    if Self::read_line(&mut reader, &mut line).await? == 0 {
                        return Ok(());
                    }
                    if line.trim_end_matches(['\r', '\n']) == "." {
                        break;
                    }
                    content.extend_from_slice(line.as_bytes());
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                Self::reply(&mut writer, &config, &config.data_end_response.to_bytes()).await?;
            }
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Replace the advertised EHLO lines; the first is the greeting line
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: Vec<String>) -> Self {
        self.config.ehlo_code = code;
        self.config.capabilities = capabilities;
        self
    }

    /// The final reply to an `AUTH` exchange
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Drop the connection after N commands
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Hang on the Nth command (0-indexed)
    #[must_use]
    pub const fn with_timeout_on_command(mut self, command_index: usize) -> Self {
        self.config.timeout_on_command = Some(command_index);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(AtomicUsize::new(0));

        let commands_clone = Arc::clone(&commands);
        let shutdown_clone = Arc::clone(&shutdown);
        let connections_clone = Arc::clone(&connections);

        tokio::spawn(async move {
            while !shutdown_clone.load(Ordering::Relaxed) {
                // Accept with a timeout so the shutdown flag is rechecked
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    connections_clone.fetch_add(1, Ordering::Relaxed);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands_clone);

                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
            connections,
        })
    }
}
