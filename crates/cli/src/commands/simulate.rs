//! Offline simulations against the demo cluster and synthetic load

use anyhow::{anyhow, bail, Result};
use chrono::{Duration, Utc};
use colored::Colorize;
use rebalancer_lib::{
    cluster::{SimulatedCluster, SimulatedNodePool},
    config::{RebalanceConfig, ScalingConfig},
    observability::{EventLogger, RebalancerMetrics},
    rebalance::{CycleOutcome, FallbackReport, MigrationOutcome, RebalanceOrchestrator},
    scaling::{LoadPhase, NodePoolAutoscaler, SyntheticMetricsSource},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{
    color_status, print_header, print_info, print_json, print_nodes, print_success,
    print_warning, render_table, OutputFormat,
};

const DEFAULT_SEED: u64 = 42;

/// Row for the migration table
#[derive(Tabled)]
struct MigrationRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Short label and free-text detail for a migration outcome
pub fn outcome_label(outcome: &MigrationOutcome) -> (&'static str, String) {
    match outcome {
        MigrationOutcome::Moved { from, to } => ("moved", format!("{from} -> {to}")),
        MigrationOutcome::Denied { reason } => ("denied", reason.clone()),
        MigrationOutcome::InsufficientCapacity => {
            ("insufficient_capacity", "no destination has room".to_string())
        }
        MigrationOutcome::NotFound => ("not_found", String::new()),
        MigrationOutcome::RateLimited => ("rate_limited", "retries exhausted".to_string()),
        MigrationOutcome::Failed { error } => ("failed", error.clone()),
    }
}

/// Row for the fallback placement table
#[derive(Tabled)]
struct PlacementRow {
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Placed on")]
    node: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
}

fn print_interruption(report: &FallbackReport) {
    println!();
    print_header(&format!("Spot interruption: {}", report.node));
    if report.placements.is_empty() {
        print_info("Node had no pods");
        return;
    }

    let rows: Vec<PlacementRow> = report
        .placements
        .iter()
        .map(|p| PlacementRow {
            pod: p.pod.clone(),
            node: p
                .node
                .clone()
                .unwrap_or_else(|| color_status("unplaceable")),
            capacity: match (&p.node, p.durable) {
                (None, _) => "-".to_string(),
                (Some(_), true) => "regular (fallback)".yellow().to_string(),
                (Some(_), false) => "spot".cyan().to_string(),
            },
        })
        .collect();
    println!("{}", render_table(rows));

    let unplaceable = report.unplaceable();
    if unplaceable.is_empty() {
        print_success(&format!("All {} orphaned pods re-placed", report.orphaned));
    } else {
        print_warning(&format!(
            "{} pods could not be placed: {}",
            unplaceable.len(),
            unplaceable.join(", ")
        ));
    }
}

/// Run one rebalance cycle on the demo cluster, optionally followed by a
/// spot interruption
pub async fn simulate_rebalance(
    interrupt: Option<String>,
    seed: Option<u64>,
    max_pods: usize,
    format: OutputFormat,
) -> Result<()> {
    let now = Utc::now();
    let cluster = Arc::new(SimulatedCluster::demo(now));
    let config = RebalanceConfig {
        max_pods_per_cycle: max_pods,
        rng_seed: Some(seed.unwrap_or(DEFAULT_SEED)),
        ..Default::default()
    };

    let mut orchestrator = RebalanceOrchestrator::new(
        cluster.clone(),
        &config,
        RebalancerMetrics::new()?,
        EventLogger::new("simulation"),
    );

    let report = match orchestrator.run_cycle(now).await {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Failed(error) => bail!("Rebalance cycle failed: {}", error),
        CycleOutcome::Skipped { .. } => bail!("Rebalance cycle was skipped"),
    };

    let interruption = match interrupt {
        Some(node) => Some(
            orchestrator
                .handle_interruption(&node)
                .await?
                .ok_or_else(|| anyhow!("'{}' is not a spot node of the demo cluster", node))?,
        ),
        None => None,
    };
    let nodes = cluster.snapshot().await.summaries();

    if let OutputFormat::Json = format {
        return print_json(&json!({
            "cycle": report,
            "interruption": interruption,
            "nodes": nodes,
        }));
    }

    print_header("Before rebalance");
    print_nodes(&report.before);

    println!();
    print_header("Migrations");
    if report.migration.migrations.is_empty() {
        print_info("No pods selected for migration");
    } else {
        let rows: Vec<MigrationRow> = report
            .migration
            .migrations
            .iter()
            .map(|m| {
                let (label, detail) = outcome_label(&m.outcome);
                MigrationRow {
                    pod: m.pod.clone(),
                    priority: format!("{:.2}", m.priority),
                    outcome: color_status(label),
                    detail,
                }
            })
            .collect();
        println!("{}", render_table(rows));
    }
    println!(
        "Candidates: {}  Moved: {}  Denied: {}  Skipped: {}",
        report.candidates,
        report.migration.moved.to_string().green(),
        report.migration.denied.to_string().yellow(),
        report.migration.skipped
    );

    println!();
    print_header("After rebalance");
    print_nodes(&report.after);

    if let Some(interruption) = &interruption {
        print_interruption(interruption);
        println!();
        print_header("After interruption");
        print_nodes(&nodes);
    }

    Ok(())
}

/// One autoscaler iteration
#[derive(Debug, Serialize, Tabled)]
pub struct ScalingRow {
    #[tabled(rename = "#")]
    pub iteration: u64,
    #[tabled(rename = "Phase")]
    pub phase: String,
    #[tabled(rename = "CPU %", display_with = "one_decimal")]
    pub cpu: f64,
    #[tabled(rename = "Memory %", display_with = "one_decimal")]
    pub memory: f64,
    #[tabled(rename = "Response (s)", display_with = "two_decimals")]
    pub response_time: f64,
    #[tabled(rename = "Replicas")]
    pub replicas: u32,
    #[tabled(rename = "Decision")]
    pub decision: String,
}

fn one_decimal(value: &f64) -> String {
    format!("{:.1}", value)
}

fn two_decimals(value: &f64) -> String {
    format!("{:.2}", value)
}

/// Drive the node-pool autoscaler through low, medium and high load on a
/// simulated clock
pub async fn run_scaling(
    iterations: u64,
    step_secs: i64,
    seed: Option<u64>,
) -> Result<Vec<ScalingRow>> {
    let config = ScalingConfig::default();
    let source = Arc::new(SyntheticMetricsSource::new(Some(seed.unwrap_or(DEFAULT_SEED))));
    let mut autoscaler = NodePoolAutoscaler::new(
        &config,
        source,
        Arc::new(SimulatedNodePool::new()),
        RebalancerMetrics::new()?,
        EventLogger::new("simulation"),
    );

    let start = Utc::now();
    let mut rows = Vec::new();
    for iteration in 0..iterations {
        let now = start + Duration::seconds(step_secs * iteration as i64);
        let decision = autoscaler.tick(now).await?;
        let sample = autoscaler
            .smoother()
            .latest()
            .copied()
            .ok_or_else(|| anyhow!("autoscaler recorded no sample"))?;

        rows.push(ScalingRow {
            iteration,
            phase: format!("{:?}", LoadPhase::at(iteration)),
            cpu: sample.cpu,
            memory: sample.memory,
            response_time: sample.response_time,
            replicas: autoscaler.engine().replicas(),
            decision: decision.to_string(),
        });
    }
    Ok(rows)
}

pub async fn simulate_scaling(
    iterations: u64,
    step_secs: i64,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let rows = run_scaling(iterations, step_secs, seed).await?;

    if let OutputFormat::Json = format {
        return print_json(&rows);
    }

    let ups = rows.iter().filter(|r| r.decision.starts_with("scale up")).count();
    let downs = rows.iter().filter(|r| r.decision.starts_with("scale down")).count();
    let final_replicas = rows.last().map(|r| r.replicas).unwrap_or_default();

    print_header("Scaling simulation");
    println!("{}", render_table(rows));
    println!(
        "Scale ups: {}  Scale downs: {}  Final replicas: {}",
        ups.to_string().green(),
        downs.to_string().yellow(),
        final_replicas
    );
    Ok(())
}
