//! Output formatting utilities for the CLI.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:.green} {msg}";
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if
/// truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Borderless list table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table under a count line.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {}s found.", entity_name);
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{}s", entity_name)
    };
    format!("{} {}:\n{}", style(total).bold(), noun, table)
}

pub fn colorize_status(status: &str) -> StyledObject<&str> {
    match status {
        "success" | "succeeded" | "pass" => style(status).green().bold(),
        "running" => style(status).yellow(),
        "pending" => style(status).blue(),
        "error" | "failed" | "fail" => style(status).red().bold(),
        _ => style(status).dim(),
    }
}

pub fn usd(amount: f64) -> String {
    format!("${:.4}", amount)
}

pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    spinner.set_style(spinner_style);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message.into());
    spinner
}
