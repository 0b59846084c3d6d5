//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crudwire_core::{Customer, Item, ViewState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - identifiers only
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a list of customers
    pub fn print_customers(&self, customers: &[Customer]) {
        match self.format {
            OutputFormat::Human => {
                if customers.is_empty() {
                    println!("No customers found.");
                    return;
                }
                for customer in customers {
                    println!(
                        "{} | {} | {}",
                        short_id(&customer.customer_id),
                        truncate(&customer.name, 30),
                        truncate(&customer.email, 40)
                    );
                }
                println!("\n{} customer(s)", customers.len());
            }
            OutputFormat::Json => print_json(&customers),
            OutputFormat::Quiet => {
                for customer in customers {
                    println!("{}", customer.customer_id);
                }
            }
        }
    }

    /// Print a list of items
    pub fn print_items(&self, items: &[Item]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No items found.");
                    return;
                }
                for item in items {
                    println!(
                        "{} | {} | {:>6} | {:>9}",
                        short_id(&item.item_id),
                        truncate(&item.name, 30),
                        item.quantity,
                        format!("${:.2}", item.price)
                    );
                }
                println!("\n{} item(s)", items.len());
            }
            OutputFormat::Json => print_json(&items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.item_id);
                }
            }
        }
    }

    /// Print the whole view state
    pub fn print_view(&self, view: &ViewState) {
        match self.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "customer": view.customers,
                "item": view.items
            })),
            _ => {
                if !self.is_quiet() {
                    println!("── Customers ──");
                }
                self.print_customers(&view.customers);
                if !self.is_quiet() {
                    println!();
                    println!("── Items ──");
                }
                self.print_items(&view.items);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

/// First eight characters of an id, enough to use as a prefix
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Human form of a last-synced timestamp
pub fn format_synced(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé names", 8), "ünïcö...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("3f2b8c1e-aaaa-bbbb"), "3f2b8c1e");
        assert_eq!(short_id("c1"), "c1");
    }

    #[test]
    fn test_format_synced_never() {
        assert_eq!(format_synced(None), "never");
    }
}
