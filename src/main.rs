//! Pushrelay CLI - relays webhook events to browser push endpoints.
//!
//! This is the binary entry point. See the `pushrelay` library for the
//! delivery engine itself.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pushrelay::{
    Config, DeliveryEngine, HttpTransport, MemoryStore, NormalizedMessage, PayloadEncryptor,
    Subscription, SubscriptionStore, VapidKeys,
};

#[derive(Parser)]
#[command(name = "pushrelay", version, about = "Encrypted Web Push fan-out relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the VAPID application server key (generated on first run).
    ///
    /// Browsers pass this as `applicationServerKey` when subscribing.
    Keys,
    /// Register a browser push subscription from its JSON wire form.
    Subscribe {
        /// Path to the subscription JSON, or `-` for stdin.
        path: String,
    },
    /// List stored subscriptions.
    List,
    /// Dispatch a notification to all active subscriptions.
    Send {
        /// Path to the notification JSON, or `-` for stdin.
        path: String,
    },
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
    }
}

/// Load the signing keypair, generating one on first run.
///
/// An invalid keypair on disk is fatal: the service refuses to start
/// rather than dispatch with a key browsers were never subscribed to.
fn load_keys() -> Result<VapidKeys> {
    VapidKeys::load_or_generate(&Config::vapid_key_path()?)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Keys => {
            let keys = load_keys()?;
            println!("{}", keys.public_key_base64url());
        }
        Command::Subscribe { path } => {
            let raw = read_input(&path)?;
            let subscription = Subscription::from_wire(&raw)?;
            let endpoint = subscription.endpoint.clone();

            let store_path = Config::subscription_store_path()?;
            let store = MemoryStore::load(&store_path)?;
            store.insert(subscription).await;
            store.save(&store_path).await?;

            println!("Registered {endpoint} ({} total)", store.len().await);
        }
        Command::List => {
            let store = MemoryStore::load(&Config::subscription_store_path()?)?;
            let mut subscriptions = store.all().await;
            subscriptions.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
            for sub in subscriptions {
                println!(
                    "{}  active={} failures={} last_success={}",
                    sub.endpoint,
                    sub.active,
                    sub.failure_count,
                    sub.last_success
                        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
                );
            }
        }
        Command::Send { path } => {
            let raw = read_input(&path)?;
            let message = NormalizedMessage::from_json(&raw)?;

            let config = Config::load()?;
            let keys = load_keys()?;
            let store_path = Config::subscription_store_path()?;
            let store = Arc::new(MemoryStore::load(&store_path)?);
            let transport = Arc::new(HttpTransport::new(config.attempt_timeout())?);
            let encryptor = PayloadEncryptor::new(&keys, config.contact.clone(), config.token_ttl());

            let engine = DeliveryEngine::new(
                Arc::clone(&store) as Arc<dyn SubscriptionStore>,
                transport,
                encryptor,
                &config,
            );

            let report = engine.dispatch(message).await?;

            // Persist failure counts and deactivations from this dispatch.
            store.save(&store_path).await?;

            println!("{report}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    run(Cli::parse()).await
}
