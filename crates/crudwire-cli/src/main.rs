//! crudwire CLI
//!
//! Command-line front end for crudwire: manage customers and inventory items
//! on a backend that keeps every client in sync over a WebSocket.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crudwire_core::{Config, Session};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "crudwire")]
#[command(about = "crudwire - real-time customer and inventory admin over WebSocket")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - identifiers only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Server URL (overrides config and CRUDWIRE_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Path to config file
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage customers
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },
    /// Manage inventory items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Send a raw action, e.g. `send customer:read-all '[]'`
    Send {
        /// Action as <customer|item>:<verb>
        action: String,
        /// JSON array payload
        #[arg(default_value = "[]")]
        payload: String,
        /// Return once the frame is written instead of waiting for the server
        #[arg(long)]
        no_wait: bool,
    },
    /// Stay connected and print every change until Ctrl-C
    Watch,
    /// Show connection status and collection counts
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum CustomerCommands {
    /// Create a customer
    #[command(alias = "create")]
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
    },
    /// List all customers
    #[command(alias = "ls")]
    List,
    /// Update a customer
    Update {
        /// Customer ID (full or prefix)
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Delete customers
    #[command(alias = "rm")]
    Delete {
        /// Customer IDs (full or prefix)
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete every customer
    DeleteAll {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Create an item
    #[command(alias = "create")]
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'Q', long)]
        quantity: u64,
        #[arg(short, long)]
        price: f64,
    },
    /// List all items
    #[command(alias = "ls")]
    List,
    /// Update an item
    Update {
        /// Item ID (full or prefix)
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short = 'Q', long)]
        quantity: Option<u64>,
        #[arg(short, long)]
        price: Option<f64>,
    },
    /// Delete items
    #[command(alias = "rm")]
    Delete {
        /// Item IDs (full or prefix)
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete every item
    DeleteAll {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, reconnect_delay_ms, optimistic_updates, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands never connect
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config_path.as_ref(), &output);
    }

    let mut config = Config::load_with_cli_override(cli.config_path.as_ref())
        .context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        config.server_url = url;
        config.validate()?;
    }

    init_logging(&config);

    match cli.command {
        Commands::Watch => commands::watch::watch(&config, &output).await,
        Commands::Status => commands::status::show(&config, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
        command => {
            let session = commands::connect(&config).await?;
            let result = run_with_session(command, &session, &config, &output).await;
            session.shutdown().await;
            result
        }
    }
}

async fn run_with_session(
    command: Commands,
    session: &Session,
    config: &Config,
    output: &Output,
) -> Result<()> {
    match command {
        Commands::Customer { command } => {
            handle_customer_command(command, session, config, output).await
        }
        Commands::Item { command } => handle_item_command(command, session, config, output).await,
        Commands::Send {
            action,
            payload,
            no_wait,
        } => commands::send::send(session, config, action, payload, no_wait, output).await,
        Commands::Watch | Commands::Status | Commands::Config { .. } => unreachable!(),
    }
}

async fn handle_customer_command(
    command: CustomerCommands,
    session: &Session,
    config: &Config,
    output: &Output,
) -> Result<()> {
    use commands::customer;

    match command {
        CustomerCommands::Add { name, email } => {
            customer::add(session, config, name, email, output).await
        }
        CustomerCommands::List => customer::list(session, output),
        CustomerCommands::Update { id, name, email } => {
            customer::update(session, config, id, name, email, output).await
        }
        CustomerCommands::Delete { ids } => customer::delete(session, config, ids, output).await,
        CustomerCommands::DeleteAll { yes } => {
            customer::delete_all(session, config, yes, output).await
        }
    }
}

async fn handle_item_command(
    command: ItemCommands,
    session: &Session,
    config: &Config,
    output: &Output,
) -> Result<()> {
    use commands::item;

    match command {
        ItemCommands::Add {
            name,
            quantity,
            price,
        } => item::add(session, config, name, quantity, price, output).await,
        ItemCommands::List => item::list(session, output),
        ItemCommands::Update {
            id,
            name,
            quantity,
            price,
        } => item::update(session, config, id, name, quantity, price, output).await,
        ItemCommands::Delete { ids } => item::delete(session, config, ids, output).await,
        ItemCommands::DeleteAll { yes } => item::delete_all(session, config, yes, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if CRUDWIRE_LOG is set (e.g. `CRUDWIRE_LOG=debug`).
/// Logs to config.log_file when set, otherwise to stderr.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("CRUDWIRE_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "crudwire_core={},crudwire_cli={}",
        log_level, log_level
    ));

    match &config.log_file {
        Some(log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };

            // Ignore error if already initialized
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();

            info!("Logging initialized to {:?}", log_path);
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_item_add() {
        let cli = Cli::try_parse_from([
            "crudwire", "--json", "item", "add", "--name", "Apple", "-Q", "23", "--price", "0.5",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Item {
                command:
                    ItemCommands::Add {
                        name,
                        quantity,
                        price,
                    },
            } => {
                assert_eq!(name, "Apple");
                assert_eq!(quantity, 23);
                assert_eq!(price, 0.5);
            }
            _ => panic!("expected item add"),
        }
    }

    #[test]
    fn test_parse_send_defaults_to_empty_payload() {
        let cli = Cli::try_parse_from(["crudwire", "send", "customer:read-all"]).unwrap();
        match cli.command {
            Commands::Send {
                action,
                payload,
                no_wait,
            } => {
                assert_eq!(action, "customer:read-all");
                assert_eq!(payload, "[]");
                assert!(!no_wait);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_delete_requires_ids() {
        assert!(Cli::try_parse_from(["crudwire", "customer", "delete"]).is_err());
        assert!(Cli::try_parse_from(["crudwire", "customer", "delete-all", "--yes"]).is_ok());
    }

    #[test]
    fn test_negative_quantity_rejected() {
        assert!(Cli::try_parse_from([
            "crudwire", "item", "add", "--name", "A", "-Q", "-1", "--price", "1"
        ])
        .is_err());
    }
}
