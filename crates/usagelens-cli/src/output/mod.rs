//! Terminal rendering
//!
//! Rows go out either as a `tabled` table or as pretty JSON; status lines are
//! colored and suppressed by `--quiet`.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Render rows without printing them
pub fn render_rows<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<String>
where
    T: Serialize + Tabled,
{
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(rows)?,
        OutputFormat::Table if rows.is_empty() => "(nothing to show)".to_string(),
        OutputFormat::Table => Table::new(rows).with(Style::rounded()).to_string(),
    })
}

pub fn print_output<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    println!("{}", render_rows(rows, format)?);
    Ok(())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Warnings go to stderr and ignore `--quiet`
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

pub fn print_heading(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.bold());
    }
}

/// Compact number for table cells: 1234567 -> "1.2M"
pub fn format_compact(value: f64) -> String {
    const SCALES: [(f64, &str); 3] = [(1e9, "B"), (1e6, "M"), (1e3, "K")];
    for (scale, suffix) in SCALES {
        if value.abs() >= scale {
            return format!("{:.1}{}", value / scale, suffix);
        }
    }
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
