use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvb_client::{ClientError, CommandResult, Message, ShutdownSignal, StoreClient, StoreSettings};
use kvb_common::Status;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kvbridge", about = "Issue commands against a pooled key-value store", version)]
struct Cli {
    /// Settings file with at least `host` and `port`.
    #[arg(short, long, default_value = "store.properties")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Ping,
    #[command(arg_required_else_help = true)]
    Get { key: String },
    /// Set a value with an expiry in seconds.
    #[command(arg_required_else_help = true)]
    Set {
        key: String,
        value: String,
        #[arg(long, default_value_t = 60)]
        ttl: u64,
    },
    /// Create a key only if absent, expiring after `ttl_ms` milliseconds.
    #[command(arg_required_else_help = true)]
    Lock {
        key: String,
        value: String,
        #[arg(long, default_value_t = 30_000)]
        ttl_ms: u64,
    },
    /// Remaining lifetime in milliseconds (-1 no expiry, -2 missing, -3 failed).
    #[command(arg_required_else_help = true)]
    Ttl { key: String },
    #[command(arg_required_else_help = true)]
    Incr { key: String },
    #[command(arg_required_else_help = true)]
    Publish { channel: String, message: String },
    /// Print messages until the process is killed.
    #[command(arg_required_else_help = true)]
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = StoreSettings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    let client = StoreClient::with_config(settings.client_config())?;

    match cli.command {
        Command::Ping => print_value(client.ping()),
        Command::Get { key } => match client.get(&key).into_result() {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => println!("(nil)"),
            Err(err) => println!("{}", failure(&err)),
        },
        Command::Set { key, value, ttl } => {
            print_status(client.set_ex(&key, &value, Duration::from_secs(ttl)).map(|()| true))
        }
        Command::Lock { key, value, ttl_ms } => {
            print_status(client.set_nx(&key, &value, Duration::from_millis(ttl_ms)))
        }
        Command::Ttl { key } => println!("{}", client.pttl(&key).ttl_millis()),
        Command::Incr { key } => print_value(client.incr(&key)),
        Command::Publish { channel, message } => print_value(client.publish(&channel, &message)),
        Command::Subscribe { channels } => {
            let channels: Vec<&str> = channels.iter().map(String::as_str).collect();
            let mut printer = |message: &Message| println!("{}: {}", message.channel, message.payload);
            let report = client
                .subscribe(&mut printer, &channels, &ShutdownSignal::new())
                .into_result()?;
            println!("delivered {} messages", report.delivered);
        }
    }
    Ok(())
}

fn print_value<T: std::fmt::Display>(result: CommandResult<T>) {
    match result.into_result() {
        Ok(value) => println!("{}", value),
        Err(err) => println!("{}", failure(&err)),
    }
}

fn print_status(result: CommandResult<bool>) {
    let status = match result.into_result() {
        Ok(done) => Status::from_flag(done),
        Err(err) => failure(&err),
    };
    println!("{}", status);
}

fn failure(err: &ClientError) -> Status {
    Status::fail_with(err.to_string())
}
