//! kopectl: select a registered operator and run one action against it.

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kope_kubehub::{KubeStore, Store};
use kope_ops::{Action, BatchReport, Launcher, Operator, OperatorContext, OperatorRegistry, ProtocolConfig};
use kope_store::MemoryStore;
use serde_json::json;
use tracing::info;

pub mod demo;

#[derive(Parser, Debug)]
#[command(name = "kopectl", version, about = "Install, uninstall, reset and run kope operators")]
pub struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    pub output: Output,

    /// Registered operator key
    #[arg(long = "operator", global = true)]
    pub operator: Option<String>,

    /// Kubeconfig context (default: current context)
    #[arg(long = "context", env = "KOPE_CONTEXT", global = true)]
    pub context: Option<String>,

    /// Namespace handed to the operator
    #[arg(long = "ns", global = true)]
    pub namespace: Option<String>,

    /// Use the in-process store instead of a cluster
    #[arg(long = "memory", global = true, action = ArgAction::SetTrue)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Create the operator's resource definitions and wait for confirmation
    Install,
    /// Delete all instances, then the definitions
    Uninstall,
    /// Delete all instances, keep the definitions
    Reset,
    /// Run the operator's controller until interrupted
    Run,
    /// Print the operator's resource definitions
    Definition,
    /// List registered operator keys
    Operators,
}

impl Commands {
    fn action(self) -> Option<Action> {
        match self {
            Commands::Install => Some(Action::Install),
            Commands::Uninstall => Some(Action::Uninstall),
            Commands::Reset => Some(Action::Reset),
            Commands::Run => Some(Action::Run),
            Commands::Definition | Commands::Operators => None,
        }
    }
}

/// Entry point for binaries embedding their own registry.
pub async fn run(registry: OperatorRegistry) -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    execute(cli, &registry).await
}

pub async fn execute(cli: Cli, registry: &OperatorRegistry) -> Result<()> {
    if cli.command == Commands::Operators {
        for key in registry.keys() {
            println!("{}", key);
        }
        return Ok(());
    }
    let key = cli.operator.as_deref().ok_or_else(|| {
        anyhow!("--operator is required (known: {})", registry.keys().collect::<Vec<_>>().join(", "))
    })?;

    let Some(action) = cli.command.action() else {
        // Rendering definitions needs no cluster.
        let ctx = context(Arc::new(MemoryStore::new()), &cli);
        let operator = registry.build(key, &ctx)?;
        return print_definitions(&operator, cli.output);
    };

    let store: Arc<dyn Store> = if cli.memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(KubeStore::connect(cli.context.as_deref()).await.context("connecting to cluster")?)
    };
    let operator = registry.build(key, &context(store, &cli))?;
    info!(operator = %key, action = %action, memory = cli.memory, ns = ?cli.namespace, "kopectl invoked");

    let launcher = Launcher::new(operator);
    if let Some(report) = launcher.launch(action, interrupted()).await? {
        print_report(action, &report, cli.output)?;
    }
    Ok(())
}

fn context(store: Arc<dyn Store>, cli: &Cli) -> OperatorContext {
    OperatorContext { store, namespace: cli.namespace.clone(), config: ProtocolConfig::from_env() }
}

// Resolves on Ctrl-C; never when the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_definitions(operator: &Operator, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for def in operator.definitions() {
                println!("---");
                print!("{}", def.to_yaml()?);
            }
        }
        Output::Json => {
            let docs: Vec<_> = operator.definitions().iter().map(|d| d.tree().clone()).collect();
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
    }
    Ok(())
}

fn print_report(action: Action, report: &BatchReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            println!(
                "{}: {} confirmed, {} skipped, {} failed, {} unconfirmed",
                action,
                report.confirmed.len(),
                report.skipped.len(),
                report.failed.len(),
                report.unconfirmed.len()
            );
            for (label, names) in [
                ("confirmed", &report.confirmed),
                ("skipped", &report.skipped),
                ("failed", &report.failed),
                ("unconfirmed", &report.unconfirmed),
            ] {
                for name in names {
                    println!("  {:<12} {}", label, name);
                }
            }
        }
        Output::Json => {
            let doc = json!({
                "action": action.as_str(),
                "confirmed": report.confirmed,
                "skipped": report.skipped,
                "failed": report.failed,
                "unconfirmed": report.unconfirmed,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

fn init_tracing() {
    let env = std::env::var("KOPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KOPE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KOPE_METRICS_ADDR; expected host:port");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["kopectl", "install", "--operator", "widgets", "--memory", "--ns", "prod"])
            .expect("parse");
        assert_eq!(cli.command, Commands::Install);
        assert_eq!(cli.operator.as_deref(), Some("widgets"));
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        assert!(cli.memory);
        assert_eq!(cli.output, Output::Human);
    }

    #[test]
    fn definition_and_operators_carry_no_action() {
        assert_eq!(Commands::Definition.action(), None);
        assert_eq!(Commands::Operators.action(), None);
        assert_eq!(Commands::Reset.action(), Some(Action::Reset));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["kopectl", "apply"]).is_err());
    }
}
