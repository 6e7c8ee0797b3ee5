//! Spot rebalancer CLI
//!
//! Queries a running rebalancer daemon and runs offline simulations of the
//! rebalance and scaling loops.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{simulate, status, window};
use std::path::PathBuf;

/// Spot rebalancer CLI
#[derive(Parser)]
#[command(name = "rbctl")]
#[command(author, version, about = "CLI for the spot rebalancer", long_about = None)]
pub struct Cli {
    /// Daemon API URL (can also be set via RBCTL_API_URL env var)
    #[arg(long, env = "RBCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show loop, scaling and schedule window status of the daemon
    Status,

    /// Show node utilization as last observed by the daemon
    Nodes,

    /// Report a spot node as reclaimed so its pods are re-placed
    Interrupt {
        /// Spot node name
        node: String,
    },

    /// Run offline simulations
    #[command(subcommand)]
    Simulate(SimulateCommands),

    /// Show schedule windows and the one active at a given time
    Window {
        /// Time of day in UTC, HH:MM (defaults to now)
        #[arg(long)]
        at: Option<String>,

        /// JSON config file with a `schedule` section (defaults to built-in windows)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SimulateCommands {
    /// Rebalance the demo cluster onto spot nodes
    Rebalance {
        /// Reclaim this spot node after the cycle
        #[arg(long)]
        interrupt: Option<String>,

        /// Seed for fallback placement
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum pods moved in the cycle
        #[arg(long, default_value_t = 10)]
        max_pods: usize,
    },

    /// Autoscale a node pool through low, medium and high synthetic load
    Scaling {
        /// Number of autoscaler ticks
        #[arg(long, default_value_t = 30)]
        iterations: u64,

        /// Simulated seconds between ticks
        #[arg(long, default_value_t = 20)]
        step_secs: i64,

        /// Seed for the synthetic load
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Nodes => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::show_nodes(&client, cli.format).await?;
        }
        Commands::Interrupt { node } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::interrupt_node(&client, &node, cli.format).await?;
        }
        Commands::Simulate(simulate_cmd) => match simulate_cmd {
            SimulateCommands::Rebalance {
                interrupt,
                seed,
                max_pods,
            } => {
                simulate::simulate_rebalance(interrupt, seed, max_pods, cli.format).await?;
            }
            SimulateCommands::Scaling {
                iterations,
                step_secs,
                seed,
            } => {
                simulate::simulate_scaling(iterations, step_secs, seed, cli.format).await?;
            }
        },
        Commands::Window { at, config } => {
            window::show_windows(at.as_deref(), config.as_deref(), cli.format)?;
        }
    }

    Ok(())
}
