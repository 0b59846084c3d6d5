//! Status command handler

use anyhow::Result;

use crudwire_core::{Config, Domain, Session};

use crate::output::{format_synced, Output, OutputFormat};

/// Connect briefly and report connection and sync state
///
/// An unreachable server is reported, not treated as a failure.
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let session = Session::start(config);
    let ready = if config.resync_on_connect {
        session
            .wait_until_synced(&Domain::ALL, config.connect_timeout())
            .await
    } else {
        session
            .wait_until_open(config.connect_timeout())
            .await
            .map(|_| ())
    };

    let handle = session.connection().handle();
    let sync = session.synchronizer();
    let view = sync.view();
    let freshness = sync.freshness();
    let error = ready.err().map(|e| e.to_string());

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "url": handle.url,
                    "status": handle.status.to_string(),
                    "generation": handle.generation,
                    "error": error,
                    "counts": {
                        "customers": view.len(Domain::Customer),
                        "items": view.len(Domain::Item)
                    },
                    "last_synced": {
                        "customers": freshness.customers,
                        "items": freshness.items
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", handle.status);
        }
        OutputFormat::Human => {
            println!("crudwire Status");
            println!("===============");
            println!();
            println!("Connection:");
            println!("  Server:     {}", handle.url);
            println!("  Status:     {}", handle.status);
            println!("  Generation: {}", handle.generation);
            if let Some(ref error) = error {
                println!("  Error:      {}", error);
            }
            println!();
            println!("Contents:");
            println!(
                "  Customers: {} (last synced {})",
                view.len(Domain::Customer),
                format_synced(freshness.customers)
            );
            println!(
                "  Items:     {} (last synced {})",
                view.len(Domain::Item),
                format_synced(freshness.items)
            );
            println!();
            println!("Options:");
            println!("  Optimistic updates: {}", config.optimistic_updates);
            println!("  Reconnect delay:    {} ms", config.reconnect_delay_ms);
        }
    }

    session.shutdown().await;
    Ok(())
}
