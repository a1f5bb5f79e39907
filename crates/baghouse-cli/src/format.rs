//! Output formatting utilities for bagctl
//!
//! Supports multiple output formats:
//! - Table: ASCII tables with borders (default)
//! - JSON: Machine-readable JSON
//! - YAML: Human-readable YAML

use crate::config::OutputFormat;
use anyhow::Result;
use baghouse_storage::{Problem, Severity};
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Format and print output based on configured format
pub struct Formatter {
    format: OutputFormat,
    colored: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    /// True when output is meant for another program
    pub fn is_structured(&self) -> bool {
        self.format != OutputFormat::Table
    }

    /// Print a list of rows
    pub fn print_list<T: Serialize + Tabled>(&self, items: Vec<T>) -> Result<()> {
        match self.format {
            OutputFormat::Table => self.print_table(items),
            OutputFormat::Json => self.print_json(&items),
            OutputFormat::Yaml => self.print_yaml(&items),
        }
    }

    /// Print a whole document in a structured format (JSON for table mode).
    pub fn print_document<T: Serialize>(&self, value: &T) -> Result<()> {
        match self.format {
            OutputFormat::Yaml => self.print_yaml(value),
            _ => self.print_json(value),
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.colored {
            println!("{} {}", "✅".green(), message);
        } else {
            println!("✅ {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.colored {
            println!("{} {}", "ℹ️".blue(), message);
        } else {
            println!("ℹ️  {}", message);
        }
    }

    /// Problems go to stderr so they never mix with structured output.
    pub fn print_problem(&self, problem: &Problem) {
        let (icon, label) = match problem.severity {
            Severity::Error => ("❌", "error"),
            Severity::Warning => ("⚠️", "warning"),
        };
        let detail = problem
            .error
            .as_deref()
            .map(|e| format!("\n    {}", e))
            .unwrap_or_default();

        if self.colored {
            let label = match problem.severity {
                Severity::Error => label.red().bold(),
                Severity::Warning => label.yellow().bold(),
            };
            eprintln!("{} {}: {}{}", icon, label, problem.message, detail);
        } else {
            eprintln!("{} {}: {}{}", icon, label, problem.message, detail);
        }
    }

    pub fn print_key_value(&self, pairs: &[(&str, String)]) {
        for (key, value) in pairs {
            if self.colored {
                println!("  {}: {}", key.bold(), value);
            } else {
                println!("  {}: {}", key, value);
            }
        }
    }

    fn print_table<T: Tabled>(&self, items: Vec<T>) -> Result<()> {
        if items.is_empty() {
            println!("No items found");
            return Ok(());
        }

        let mut table = Table::new(items);
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));

        println!("{}", table);
        Ok(())
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn print_yaml<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_yaml::to_string(value)?);
        Ok(())
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
