use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, StoreBackend, TurnstileConfig};
use turnstile::ratelimit::{Admission, CounterStore, Gate, MemoryStore, PolicySet, RedisStore};

/// Response of the demo operation when a call is admitted.
const ACCEPTED: &str = "request accepted";

#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about = "Per-key admission control over a shared counter store")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the configured policies
    Policies {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send calls to a guarded demo operation and print each outcome
    Call {
        /// Name of the guarded operation
        operation: String,

        /// Number of calls to send
        #[arg(short = 'n', long, default_value_t = 1)]
        times: u32,

        /// Send all calls at once instead of one after another
        #[arg(long)]
        concurrent: bool,
    },
}

#[derive(Serialize)]
struct PolicySummary<'a> {
    operation: &'a str,
    key: &'a str,
    limit: u64,
    window_ms: u64,
    rejection_message: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TurnstileConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Policies are validated once, before any store is touched
    let policies = config.policy_set()?;
    info!(count = policies.len(), "Policies loaded");

    match cli.command {
        Command::Policies { json } => print_policies(&policies, json)?,
        Command::Call {
            operation,
            times,
            concurrent,
        } => {
            policies.resolve(&operation)?;

            match config.store.backend {
                StoreBackend::Redis => {
                    let store = Arc::new(RedisStore::connect(&config.store).await?);
                    let gate = Gate::with_policies(store.clone(), policies);
                    run_calls(&gate, &operation, times, concurrent).await;
                    drop(gate);

                    match Arc::try_unwrap(store) {
                        Ok(store) => store.shutdown().await,
                        Err(_) => warn!("Counter store still shared at exit"),
                    }
                }
                StoreBackend::Memory => {
                    warn!("Using the in-process counter store; limits are not shared between processes");
                    let gate = Gate::with_policies(Arc::new(MemoryStore::new()), policies);
                    run_calls(&gate, &operation, times, concurrent).await;
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_policies(policies: &PolicySet, json: bool) -> anyhow::Result<()> {
    let summaries: Vec<PolicySummary<'_>> = policies
        .iter()
        .map(|(operation, policy)| PolicySummary {
            operation,
            key: &policy.key,
            limit: policy.limit,
            window_ms: policy.window_ms(),
            rejection_message: &policy.rejection_message,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for s in summaries {
        println!(
            "{:<20} key={:<18} limit={:<6} window={}ms",
            s.operation, s.key, s.limit, s.window_ms
        );
    }
    Ok(())
}

/// The operation behind the gate. It only answers when admitted.
async fn demo_operation(call: u32) -> &'static str {
    info!(call = call, "Demo operation invoked");
    ACCEPTED
}

async fn run_calls<S>(gate: &Gate<S>, operation: &str, times: u32, concurrent: bool)
where
    S: CounterStore + ?Sized,
{
    if concurrent {
        let calls = (1..=times).map(|call| async move {
            (call, gate.guard_named(operation, || demo_operation(call)).await)
        });
        for (call, outcome) in join_all(calls).await {
            report(call, outcome);
        }
    } else {
        for call in 1..=times {
            let outcome = gate.guard_named(operation, || demo_operation(call)).await;
            report(call, outcome);
        }
    }
}

fn report(call: u32, outcome: turnstile::error::Result<Admission<&'static str>>) {
    match outcome {
        Ok(Admission::Proceeded(body)) => println!("#{:<4} {}", call, body),
        Ok(Admission::Rejected {
            message,
            current_count,
        }) => println!("#{:<4} {} (count {})", call, message, current_count),
        Err(e) => println!("#{:<4} error: {}", call, e),
    }
}
