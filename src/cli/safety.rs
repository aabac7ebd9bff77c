//! Safety log subcommands and transcript replay.

use crate::safety::SafetyMonitor;
use crate::types::SafetyEventKind;
use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum SafetyCommand {
    /// Show the newest safety events
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long = "type", value_name = "TYPE", value_parser = parse_kind)]
        kind: Option<SafetyEventKind>,
    },

    /// Feed a JSON-lines transcript through both breakers
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        agent: String,
    },
}

fn parse_kind(s: &str) -> std::result::Result<SafetyEventKind, String> {
    s.parse()
}

/// One transcript line: a tool invocation and its outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptStep {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// A breaker that fired during replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    /// 1-based transcript line.
    pub line: usize,
    #[serde(rename = "type")]
    pub kind: SafetyEventKind,
    pub tool: String,
}

/// Run every step through `monitor`, stopping at the first trip of each
/// breaker the way a live agent would stop.
pub fn replay(monitor: &mut SafetyMonitor, reader: impl BufRead) -> Result<Vec<Trip>> {
    let mut trips = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read transcript")?;
        if line.trim().is_empty() {
            continue;
        }
        let step: TranscriptStep = serde_json::from_str(&line)
            .with_context(|| format!("invalid transcript line {}", index + 1))?;

        if monitor.doom_loop.check(&step.tool, &step.args) {
            trips.push(Trip {
                line: index + 1,
                kind: SafetyEventKind::DoomLoop,
                tool: step.tool.clone(),
            });
            break;
        }
        if step.ok {
            monitor.mistakes.record_success();
        } else {
            let error = step.error.as_deref().unwrap_or("unknown error");
            if monitor.mistakes.record_failure(error) {
                trips.push(Trip {
                    line: index + 1,
                    kind: SafetyEventKind::MaxMistakes,
                    tool: step.tool,
                });
                break;
            }
        }
    }
    Ok(trips)
}
