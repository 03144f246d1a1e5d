//! Output formatting for the Castellan CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print a warning to stderr so it survives piping of JSON output.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Table | OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(value)?;
            json.push('\n');
            json
        }
    })
}

/// Render rows as a rounded table, or a dimmed notice when empty.
pub fn table<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return "No results found.".dimmed().to_string();
    }
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string()
}

/// Print a list of items in the requested format.
///
/// Table output uses the `Tabled` rows; JSON and YAML serialize the
/// original items so no fields are lost.
pub fn print_list<T: Serialize, R: Tabled>(
    items: &[T],
    rows: impl FnOnce(&[T]) -> Vec<R>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", table(&rows(items))),
        _ => print!("{}", render(items, format)?),
    }
    Ok(())
}

/// Print a single item as JSON or YAML.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    print!("{}", render(item, format)?);
    Ok(())
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Placeholder for absent optional values in tables.
pub fn or_dash(value: Option<&str>) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or("-").to_string()
}
