//! Colored CLI display utilities for runner output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while an engine process is supervised.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::config::DebugProfile;
use crate::runner::{RunState, RunStatus};
use crate::save::WatchOutcome;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Short plain-text summary of a status.
#[must_use]
pub fn format_status(status: &RunStatus) -> String {
    let mut summary = match status.state {
        RunState::Idle => "idle".to_string(),
        RunState::PendingDelayedStart => "waiting for save".to_string(),
        RunState::Running if status.stopping => "stopping".to_string(),
        RunState::Running => "running".to_string(),
    };

    if let Some(pid) = status.pid {
        summary.push_str(&format!(" pid={pid}"));
    }
    if status.state == RunState::Idle {
        if let Some(exit) = &status.last_exit {
            summary.push_str(&format!(" ({})", exit.describe()));
        }
    }
    summary
}

/// Print a run-state change.
pub fn print_state_change(status: &RunStatus) {
    let label = match status.state {
        RunState::Idle if status.last_exit.as_ref().is_some_and(|e| !e.is_success()) => {
            "[RUN]".red().bold().to_string()
        }
        RunState::Idle => "[RUN]".blue().bold().to_string(),
        RunState::PendingDelayedStart => "[RUN]".yellow().bold().to_string(),
        RunState::Running => "[RUN]".green().bold().to_string(),
    };
    println!("{} {} {}", timestamp().dimmed(), label, format_status(status));
    let _ = io::stdout().flush();
}

/// Print a status as one JSON line.
pub fn print_status_json(status: &RunStatus) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{line}"),
        Err(e) => print_error(&format!("Failed to encode status: {e}")),
    }
    let _ = io::stdout().flush();
}

/// Print process output verbatim.
pub fn print_output(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// Print what a save watcher did.
pub fn print_watch_outcome(outcome: &WatchOutcome) {
    let message = match outcome {
        WatchOutcome::Started(c) => format!("{} finished, launching", c.kind),
        WatchOutcome::Stopped(c) => format!("{} failed, run cancelled", c.kind),
        WatchOutcome::Rejected { completion, reason } => {
            format!("{} finished but launch failed: {reason}", completion.kind)
        }
        WatchOutcome::RunnerGone(c) => format!("{} finished after the runner closed", c.kind),
        WatchOutcome::SourceClosed => "save abandoned".to_string(),
        WatchOutcome::Detached => "watch detached".to_string(),
        WatchOutcome::Failed(reason) => format!("save watcher failed: {reason}"),
    };
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[SAVE]".magenta().bold(),
        message
    );
    let _ = io::stdout().flush();
}

/// Print one configured profile.
pub fn print_profile(name: &str, profile: &DebugProfile, is_default: bool) {
    let marker = if is_default { "*" } else { " " };
    let command = std::iter::once(profile.executable.as_str())
        .chain(profile.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{marker} {} {} {}",
        name.cyan().bold(),
        truncate(&command, 60),
        truncate(&profile.description, 40).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print which config file is in effect.
pub fn print_config_source(source: Option<&Path>, searched: &[PathBuf]) {
    match source {
        Some(path) => println!("{} {}", "Config:".bold(), path.display()),
        None => {
            let searched = searched
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            println!("{}", format!("No config file found (searched: {searched})").dimmed());
        }
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stderr().flush();
}
