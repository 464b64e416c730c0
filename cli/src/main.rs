// pctransfer: public-PC transfer server
//
// Serves the desktop and mobile pages, relays unlock / status events over
// WebSocket and mails submitted packages through the configured SMTP relay.

mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pctransfer_core::dispatch::template::render_body;
use pctransfer_core::session::registry::generate_id;
use pctransfer_core::{MailSender, OutboundMessage, SmtpMailer, TransferHub, TransferPackage};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pctransfer")]
#[command(about = "PC Transfer — pair a public PC with your phone and mail yourself the goods", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP + WebSocket server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<String>,
        /// Also write daily-rotated logs to this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Session helpers
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Validate mail settings, optionally sending a test message
    CheckMail {
        #[arg(long)]
        send_to: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print a sample session id and its mobile link
    New,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            log_dir,
        } => {
            let _guard = init_logging("info", log_dir.as_deref())?;
            cmd_serve(port, bind).await
        }
        Commands::Config { action } => {
            init_logging("warn", None)?;
            cmd_config(action)
        }
        Commands::Session { action } => {
            init_logging("warn", None)?;
            cmd_session(action)
        }
        Commands::CheckMail { send_to } => {
            init_logging("warn", None)?;
            cmd_check_mail(send_to).await
        }
    }
}

/// Console logging filtered by RUST_LOG, plus an optional rolling file.
/// The returned guard flushes the file writer and must outlive the server.
fn init_logging(default_filter: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console = tracing_subscriber::fmt::layer();

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "pctransfer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            Ok(None)
        }
    }
}

async fn cmd_serve(port: Option<u16>, bind: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let port = port.unwrap_or(config.listen_port);
    let bind = bind.unwrap_or_else(|| config.bind_address.clone());
    let ip: IpAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    let addr = SocketAddr::new(ip, port);

    let hub_config = config.effective_hub();
    let has_credentials = hub_config.mail.has_credentials();
    let hub = TransferHub::with_smtp(hub_config).context("Failed to configure mail relay")?;

    println!("{}", "PC Transfer — Starting...".bold());
    println!();
    println!("  {} Listening on {}", "✓".green(), addr.to_string().bright_cyan());
    if has_credentials {
        println!("  {} Mail relay configured", "✓".green());
    } else {
        println!(
            "  {} Mail credentials missing: transfers will fail until {} and {} are set",
            "!".yellow(),
            "SMTP_EMAIL".bright_cyan(),
            "SMTP_PASSWORD".bright_cyan()
        );
    }
    println!();

    let sweeper = spawn_sweeper(hub.clone(), config.sweep_interval_secs);
    let ctx = Arc::new(server::WebContext::new(hub, config.public_base_url.clone()));

    tokio::select! {
        _ = server::serve(addr, ctx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    if let Some(task) = sweeper {
        task.abort();
    }
    Ok(())
}

/// Periodically evict expired sessions. An interval of 0 disables sweeping;
/// expired sessions are then only dropped when looked up.
fn spawn_sweeper(hub: TransferHub, interval_secs: u64) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = hub.sweep_expired();
            if !expired.is_empty() {
                info!("Swept {} expired session(s)", expired.len());
            }
        }
    }))
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            let shown = config.get(&key).unwrap_or_else(|| "(unset)".to_string());
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), shown);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown or unset config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<30} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  {}",
                format!("File: {}", config::Config::config_file()?.display()).dimmed()
            );
        }
    }

    Ok(())
}

fn cmd_session(action: SessionAction) -> Result<()> {
    let config = config::Config::load()?;

    match action {
        SessionAction::New => {
            let id = generate_id(config.hub.session.id_length);
            let base = config
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("http://localhost:{}", config.listen_port));

            println!("{}", "Sample Session".bold());
            println!("  ID:     {}", id.bright_cyan());
            println!("  Mobile: {}", format!("{}/mobile/{}", base, id).bright_green());
            println!();
            println!(
                "  {}",
                "Not registered with a running server; open the desktop page to get a live link."
                    .dimmed()
            );
        }
    }

    Ok(())
}

async fn cmd_check_mail(send_to: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let mail = config.effective_hub().mail;

    println!("{}", "Mail Relay".bold());
    println!("  Endpoint: {}:{}", mail.host.bright_cyan(), mail.port);
    println!(
        "  Identity: {}",
        mail.username.as_deref().unwrap_or("(unset)")
    );
    println!(
        "  Secret:   {}",
        if mail.password.is_some() { "(set)" } else { "(unset)" }
    );
    println!(
        "  Sender:   {}",
        mail.sender_address().unwrap_or("(unset)")
    );
    println!();

    if !mail.has_credentials() {
        println!(
            "{} Credentials missing: set {} and {} (or mail.username / mail.password)",
            "✗".red(),
            "SMTP_EMAIL".bright_cyan(),
            "SMTP_PASSWORD".bright_cyan()
        );
        anyhow::bail!("mail credentials are not configured");
    }

    let mailer = SmtpMailer::from_config(&mail).context("Invalid mail relay settings")?;
    println!("{} Credentials present", "✓".green());

    if let Some(recipient) = send_to {
        let from = mail
            .sender_address()
            .context("No sender address configured")?
            .to_string();
        let message = OutboundMessage {
            from,
            to: recipient.clone(),
            subject: mail.subject.clone(),
            html_body: render_body(&TransferPackage::text("Test message from pctransfer check-mail")),
            attachment: None,
        };

        println!("  Sending test message via {}...", mailer.endpoint());
        let send = mailer.send(message);
        let outcome = if mail.send_timeout().is_zero() {
            send.await
        } else {
            tokio::time::timeout(mail.send_timeout(), send)
                .await
                .context("Mail relay did not respond in time")?
        };
        outcome.context("Test message failed")?;
        println!("{} Test message sent to {}", "✓".green(), recipient.bright_cyan());
    }

    Ok(())
}
