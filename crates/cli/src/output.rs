//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use rebalancer_lib::models::{NodeClass, NodeSummary};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render rows with the rounded table style
pub fn render_table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(60));
}

/// `used/total` with one decimal
pub fn format_usage(used: f64, total: f64) -> String {
    format!("{:.1}/{:.1}", used, total)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color a utilization fraction: green below 60%, yellow below 85%
pub fn color_utilization(fraction: f64) -> String {
    let formatted = format_percent(fraction * 100.0);
    if fraction < 0.6 {
        formatted.green().to_string()
    } else if fraction < 0.85 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

pub fn color_class(class: NodeClass) -> String {
    match class {
        NodeClass::Preemptible => class.to_string().cyan().to_string(),
        NodeClass::Durable => class.to_string().normal().to_string(),
    }
}

/// Color a status or decision label
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "moved" | "up" => status.green().to_string(),
        "degraded" | "down" | "rate_limited" | "insufficient_capacity" => {
            status.yellow().to_string()
        }
        "unhealthy" | "denied" | "failed" | "not_found" | "unplaceable" => {
            status.red().to_string()
        }
        _ => status.to_string(),
    }
}

/// Row for node tables
#[derive(Tabled)]
pub struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Pods")]
    pods: usize,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "CPU %")]
    cpu_pct: String,
    #[tabled(rename = "Memory (GiB)")]
    memory: String,
}

impl From<&NodeSummary> for NodeRow {
    fn from(node: &NodeSummary) -> Self {
        let fraction = if node.cpu_allocatable > 0.0 {
            node.cpu_used / node.cpu_allocatable
        } else {
            0.0
        };
        Self {
            name: node.name.clone(),
            class: color_class(node.class),
            pods: node.pod_count,
            cpu: format_usage(node.cpu_used, node.cpu_allocatable),
            cpu_pct: color_utilization(fraction),
            memory: format_usage(node.memory_used_gib, node.memory_allocatable_gib),
        }
    }
}

pub fn print_nodes(nodes: &[NodeSummary]) {
    if nodes.is_empty() {
        println!("{}", "No nodes found".yellow());
        return;
    }
    println!("{}", render_table(nodes.iter().map(NodeRow::from).collect()));
}
