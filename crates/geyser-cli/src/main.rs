//! geyser-tail - print updates from a geyser subscription stream
//!
//! Connects to a newline-delimited JSON stream server, registers the
//! requested subscriptions and prints every update until interrupted.
//! The connection is kept alive and restored by the client library.

mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use geyser_client::{ClientEvent, GeyserClient, JsonLinesTransport, SubscribeOptions};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{SubscriptionEntry, TailConfig};
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "geyser-tail")]
#[command(author, version, about = "Tail a geyser subscription stream")]
struct Cli {
    /// Stream server address (host:port)
    #[arg(short, long, env = "GEYSER_ADDRESS")]
    address: Option<String>,

    /// Access token sent when the stream opens
    #[arg(long, env = "GEYSER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "GEYSER_CONFIG")]
    config: Option<PathBuf>,

    /// Subscription as method[:id][=json], may be repeated
    #[arg(short, long = "subscribe", value_name = "SPEC")]
    subscriptions: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("geyser_tail=debug,geyser_client=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("geyser_tail=info,geyser_client=info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => TailConfig::load_from(path)?,
        None => TailConfig::default(),
    };

    let address = cli
        .address
        .clone()
        .or_else(|| config.endpoint.address.clone())
        .context("No stream address given (use --address or [endpoint] address)")?;
    let token = cli.token.clone().or_else(|| config.endpoint.token.clone());

    let mut subscriptions = config.subscriptions.clone();
    for spec in &cli.subscriptions {
        subscriptions.push(SubscriptionEntry::parse(spec)?);
    }
    if subscriptions.is_empty() {
        tracing::warn!("No subscriptions requested, only liveness traffic will be seen");
    }

    let mut transport = JsonLinesTransport::new(address.clone());
    if let Some(token) = token {
        transport = transport.with_token(token);
    }
    let client = GeyserClient::with_config(Arc::new(transport), config.client.clone())
        .context("Failed to create client")?;
    let mut events = client.events();

    tracing::info!("Connecting to {}", address);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;

    for entry in &subscriptions {
        let options = SubscribeOptions { id: entry.id.clone() };
        let id = client
            .subscribe_named(&entry.method, entry.params.clone(), options)
            .await
            .with_context(|| format!("Failed to subscribe to {}", entry.method))?;
        tracing::info!(subscription_id = %id, method = %entry.method, "Subscribed");
    }

    let outcome = tail(&mut events, cli.output).await;

    if let Err(e) = client.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
    }
    outcome
}

/// Print updates until Ctrl+C or until the client gives up
async fn tail(
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    format: OutputFormat,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, disconnecting");
                return Ok(());
            }
            event = events.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Output fell behind, events dropped");
                continue;
            }
            Err(RecvError::Closed) => return Ok(()),
        };

        if let Some(line) = output::render(&event, format) {
            println!("{}", line);
            continue;
        }

        match event {
            ClientEvent::Disconnected { explicit, .. } => {
                tracing::warn!(explicit, "Stream disconnected");
            }
            ClientEvent::Reconnecting { attempt, remaining } => {
                tracing::info!(attempt, remaining, "Reconnecting");
            }
            ClientEvent::Resubscribed { subscriptions } => {
                tracing::info!(subscriptions = subscriptions.len(), "Subscriptions restored");
            }
            ClientEvent::Error(e) => tracing::warn!("{}", e),
            ClientEvent::ReconnectExhausted { attempts } => {
                anyhow::bail!("Gave up after {} reconnect attempts", attempts);
            }
            ClientEvent::UnhandledMessage { update } => {
                tracing::debug!(filters = ?update.filters, "Update for no known subscription");
            }
            other => tracing::trace!(event = other.name(), "Client event"),
        }
    }
}
