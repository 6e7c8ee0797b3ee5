//! Daemon status commands

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_percent, print_header, print_info, print_json, print_nodes,
    print_success, print_warning, OutputFormat,
};

/// Show loop state, scaling and window status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    if let OutputFormat::Json = format {
        return print_json(&status);
    }

    print_header("Rebalancer Status");
    println!("Cluster: {}", status.cluster.cyan());
    println!("Mode:    {}", status.mode.cyan());
    println!(
        "Cycles:  {} completed, {} failed",
        status.cycles_completed.to_string().green(),
        if status.cycles_failed > 0 {
            status.cycles_failed.to_string().red()
        } else {
            status.cycles_failed.to_string().normal()
        }
    );
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error.red());
    }

    println!();
    match &status.last_cycle {
        Some(cycle) => {
            println!("{}", "Last cycle".bold());
            println!(
                "  Started:    {}",
                cycle.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Duration:   {}ms", cycle.duration_ms);
            println!(
                "  Candidates: {} ({} selected)",
                cycle.candidates,
                cycle.selected.len()
            );
            println!(
                "  Moved: {}  Denied: {}  Skipped: {}",
                cycle.migration.moved.to_string().green(),
                cycle.migration.denied.to_string().yellow(),
                cycle.migration.skipped
            );
        }
        None => print_info("No rebalance cycle has completed yet"),
    }

    if let Some(interruption) = &status.last_interruption {
        println!();
        println!("{}", "Last interruption".bold());
        println!("  Node:        {}", interruption.node.cyan());
        println!(
            "  Orphaned: {}  On spot: {}  On fallback: {}  Unplaceable: {}",
            interruption.orphaned,
            interruption.placed_on_spot(),
            interruption.placed_on_fallback(),
            interruption.unplaceable().len()
        );
    }

    if let Some(scaling) = &status.scaling {
        println!();
        println!("{}", "Scaling".bold());
        println!(
            "  Replicas:   {} (bounds {}-{})",
            scaling.replicas, scaling.min_replicas, scaling.max_replicas
        );
        println!(
            "  Decision:   {} ({})",
            color_status(&scaling.last_decision),
            scaling.reason
        );
        println!(
            "  CPU: {}  Memory: {}  Response: {:.2}s  Stable: {}",
            format_percent(scaling.mean_cpu),
            format_percent(scaling.mean_memory),
            scaling.mean_response_time,
            scaling.stable
        );
    }

    if let Some(window) = &status.window {
        println!();
        println!("{}", "Schedule window".bold());
        println!(
            "  {} (replicas {}-{})",
            window.name.cyan(),
            window.min_replicas,
            window.max_replicas
        );
        if window.rollback_active {
            print_warning("Rollback active: max replicas raised for high load");
        }
    }

    Ok(())
}

/// Show per-node utilization as last observed by the daemon
pub async fn show_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status.nodes),
        OutputFormat::Table => {
            print_nodes(&status.nodes);
            Ok(())
        }
    }
}

/// Ask the daemon to handle the loss of a spot node
pub async fn interrupt_node(client: &ApiClient, node: &str, format: OutputFormat) -> Result<()> {
    let accepted = client.interrupt(node).await?;

    match format {
        OutputFormat::Json => print_json(&accepted),
        OutputFormat::Table => {
            print_success(&format!(
                "Interruption of {} queued for the rebalance loop",
                accepted.node
            ));
            Ok(())
        }
    }
}
