//! Schedule window inspection

use anyhow::{Context, Result};
use chrono::{NaiveTime, Utc};
use colored::Colorize;
use rebalancer_lib::{
    config::ScheduleConfig,
    scaling::{ScheduleWindow, ScheduleWindowPolicy},
    RebalancerConfig,
};
use serde_json::json;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_header, print_json, render_table, OutputFormat};

#[derive(Tabled)]
struct WindowRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "Window")]
    name: String,
    #[tabled(rename = "From")]
    start: String,
    #[tabled(rename = "To")]
    end: String,
    #[tabled(rename = "Min")]
    min_replicas: u32,
    #[tabled(rename = "Max")]
    max_replicas: u32,
}

/// Windows from a JSON config file, or the built-in defaults
pub fn load_policy(config: Option<&Path>) -> Result<ScheduleWindowPolicy> {
    let schedule = match config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: RebalancerConfig =
                serde_json::from_str(&content).context("Failed to parse config file")?;
            config.schedule
        }
        None => ScheduleConfig::default(),
    };
    schedule.policy().context("Invalid schedule windows")
}

/// Parse `HH:MM`, defaulting to the current UTC time
pub fn parse_at(at: Option<&str>) -> Result<NaiveTime> {
    match at {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .with_context(|| format!("Invalid time '{}', expected HH:MM", raw)),
        None => Ok(Utc::now().time()),
    }
}

/// List the windows and highlight the one active at `at`
pub fn show_windows(at: Option<&str>, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let policy = load_policy(config)?;
    let time = parse_at(at)?;
    let active = policy.active_window(time)?;

    if let OutputFormat::Json = format {
        return print_json(&json!({
            "at": time.format("%H:%M").to_string(),
            "active": active.name,
            "global_max_replicas": policy.global_max_replicas(),
            "windows": policy.windows(),
        }));
    }

    let row = |w: &ScheduleWindow| {
        let is_active = w.name == active.name;
        WindowRow {
            marker: if is_active { "●".green().to_string() } else { String::new() },
            name: if is_active { w.name.bold().to_string() } else { w.name.clone() },
            start: w.start.format("%H:%M").to_string(),
            end: w.end.format("%H:%M").to_string(),
            min_replicas: w.min_replicas,
            max_replicas: w.max_replicas,
        }
    };

    print_header(&format!("Schedule windows at {} UTC", time.format("%H:%M")));
    println!("{}", render_table(policy.windows().iter().map(row).collect()));
    println!(
        "Active: {} ({}-{} replicas), rollback max: {}",
        active.name.cyan(),
        active.min_replicas,
        active.max_replicas,
        policy.global_max_replicas()
    );
    Ok(())
}
