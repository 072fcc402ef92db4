//! Command-line utility for operating sendgate
//!
//! This tool works directly against the configured stores:
//! - Enqueueing a test message, optionally with file attachments
//! - Disabling and re-enabling a relay for one recipient domain
//! - Trying a relay selection for a domain
//! - Checking a configuration file

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sendgate::{Components, Config, find_config_file};
use sendgate_common::{Attachment, Domain, MailRequest, RelayIndex};

/// Command-line utility for operating sendgate
#[derive(Parser, Debug)]
#[command(name = "sendgatectl")]
#[command(about = "Operate the sendgate relay dispatcher", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to the usual search)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload attachments and publish a message to the queue
    Enqueue {
        #[arg(long)]
        from: String,

        /// Comma separated recipients
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        /// HTML body
        #[arg(long)]
        body: String,

        /// File to attach; may be repeated
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Relay administration against the counter store (Redis only)
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
    /// Validate the configuration and print the relays
    Check,
}

#[derive(Subcommand, Debug)]
enum RelayAction {
    /// Stop using a relay for a recipient domain until re-enabled
    Disable { index: RelayIndex, domain: String },
    /// Let a disabled relay be selected again
    Enable { index: RelayIndex, domain: String },
    /// Run a selection for a domain; a winning claim holds its window as usual
    Select { domain: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Check => cmd_check(&config),
        Commands::Enqueue {
            from,
            to,
            subject,
            body,
            attachments,
        } => {
            let request = MailRequest {
                from: Some(from),
                to: Some(to),
                subject: Some(subject),
                body: Some(body),
                attachments: read_attachments(&attachments).await?,
            };
            cmd_enqueue(&config, request).await
        }
        Commands::Relay { action } => cmd_relay(&config, action).await,
    }
}

fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let registry = config.registry()?;

    println!("{:<6} {:<40} {:<14}", "INDEX", "RELAY", "TLS");
    println!("{}", "-".repeat(62));
    for (index, relay) in registry.relays().iter().enumerate() {
        let tls = format!("{:?}", relay.tls);
        println!("{index:<6} {:<40} {tls:<14}", relay.to_string());
    }

    let mut domains: Vec<_> = registry.filtered_domains().map(Domain::as_str).collect();
    domains.sort_unstable();
    if domains.is_empty() {
        println!("\nFiltered domains: (none)");
    } else {
        println!("\nFiltered domains: {}", domains.join(", "));
    }
    println!("Rate limit window: {}s", config.rate_limit.window_secs);

    Ok(())
}

async fn read_attachments(paths: &[PathBuf]) -> anyhow::Result<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(paths.len());

    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let filename = path
            .file_name()
            .map_or_else(|| "attachment".to_string(), |name| name.to_string_lossy().into_owned());

        attachments.push(Attachment::new(filename, data));
    }

    Ok(attachments)
}

async fn cmd_enqueue(config: &Config, request: MailRequest) -> anyhow::Result<()> {
    let components = Components::connect(config).await?;
    let attachments = request.attachments.len();

    let id = components.intake().submit(request).await?;
    println!("Enqueued {id} with {attachments} attachment(s)");

    Ok(())
}

async fn cmd_relay(config: &Config, action: RelayAction) -> anyhow::Result<()> {
    if !config.counter_store.is_shared() {
        anyhow::bail!(
            "Relay commands need a shared counter store, but counter_store is {:?}; \
             changes would only reach this process",
            config.counter_store
        );
    }

    let components = Components::connect(config).await?;
    let selector = &components.selector;

    match action {
        RelayAction::Disable { index, domain } => {
            let domain = Domain::new(domain);
            selector.disable(index, &domain).await?;
            println!("Relay {index} disabled for {domain}");
        }
        RelayAction::Enable { index, domain } => {
            let domain = Domain::new(domain);
            selector.enable(index, &domain).await?;
            println!("Relay {index} enabled for {domain}");
        }
        RelayAction::Select { domain } => {
            let domain = Domain::new(domain);
            match selector.select(&domain).await {
                Ok((index, relay)) => println!("{domain}: relay {index} ({relay})"),
                Err(sendgate_dispatch::SelectError::NoAvailableRelay(_)) => {
                    println!("{domain}: no relay available in this window");
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    Ok(())
}
