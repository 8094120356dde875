//! CLI output formatting

use crate::core::{PipelineRun, RunStatus};
use crate::service::AchievementMetrics;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Spinner shown while polling a run
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One-line summary of a run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let status_icon = match run.status {
        RunStatus::Success => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    let duration = run
        .duration_seconds
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} #{} - {} - {} - {} ({})",
        status_icon,
        style(run.id).bold(),
        format_status(run.status),
        style(run.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(run.triggered_by).cyan(),
        duration
    )
}

/// Full details of a run
pub fn format_run_details(run: &PipelineRun, verbose: bool) -> String {
    let mut lines = vec![
        format!("{} Run Details", INFO),
        format!("  ID: {}", style(run.id).cyan()),
        format!("  Status: {}", format_status(run.status)),
        format!("  Triggered by: {}", style(run.triggered_by).bold()),
        format!("  Started: {}", style(run.started_at.to_rfc3339()).dim()),
    ];

    if let Some(completed) = run.completed_at {
        lines.push(format!("  Completed: {}", style(completed.to_rfc3339()).dim()));
    }
    if let Some(duration) = run.duration_seconds {
        lines.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
    }
    if let Some(error) = &run.error {
        lines.push(format!("  Error: {}", style(error).red()));
    }
    if verbose {
        if let Some(output) = run.output.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("\n  {}", style("Output:").bold()));
            lines.push(format_output(output, 20));
        }
    }

    lines.join("\n")
}

pub fn format_metrics(metrics: &AchievementMetrics) -> String {
    let latest_duration = metrics
        .latest_duration
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    [
        format!("{} Pipeline metrics", INFO),
        format!("  Uploaded rows: {}", style(metrics.total_uploads).cyan()),
        format!("  Processed rows: {}", style(metrics.total_processed).cyan()),
        format!(
            "  Runs: {} ({} succeeded, {:.2}%)",
            style(metrics.total_runs).cyan(),
            style(metrics.success_count).green(),
            metrics.success_rate
        ),
        format!(
            "  Latest run: {} ({})",
            style(&metrics.latest_status).bold(),
            latest_duration
        ),
    ]
    .join("\n")
}

/// Format process output with truncation.
///
/// Keeps at most `max_lines` lines and cuts each one to the terminal width.
pub fn format_output(output: &str, max_lines: usize) -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    format_output_with_width(output, max_lines, width)
}

fn format_output_with_width(output: &str, max_lines: usize, width: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let mut shown: Vec<String> = lines
        .iter()
        .take(max_lines)
        .map(|line| truncate_line(line, width))
        .collect();

    if lines.len() > max_lines {
        shown.push(format!(
            "{}... ({} more lines)",
            style("[truncated]").dim(),
            lines.len() - max_lines
        ));
    }
    shown.join("\n")
}

fn truncate_line(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        line.to_string()
    } else {
        let cut: String = line.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Horizontal rule spanning the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.2}s", seconds);
    }
    let secs = seconds.round() as u64;
    if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
