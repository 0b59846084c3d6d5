//! Watch command handler

use anyhow::Result;
use chrono::Local;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crudwire_core::{Config, Session, SyncEvent, Synchronizer};

use crate::output::{Output, OutputFormat};

/// Stay connected and print every status and state change until Ctrl-C
pub async fn watch(config: &Config, output: &Output) -> Result<()> {
    let session = Session::start(config);
    let mut events = session.synchronizer().subscribe_events();

    output.message(&format!(
        "Watching {} (Ctrl-C to stop)",
        config.server_url
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(event) => print_event(session.synchronizer(), &event, output),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    output.message("Stopped.");
    Ok(())
}

fn print_event(sync: &Synchronizer, event: &SyncEvent, output: &Output) {
    match output.format {
        OutputFormat::Json => {
            if let Some(json) = event_json(sync, event) {
                println!("{}", json);
            }
        }
        OutputFormat::Human => {
            let now = Local::now().format("%H:%M:%S");
            match event {
                SyncEvent::StatusChanged(status) => println!("[{}] connection {}", now, status),
                SyncEvent::StateChanged(_) => {
                    let view = sync.view();
                    println!(
                        "[{}] {} customer(s), {} item(s)",
                        now,
                        view.customers.len(),
                        view.items.len()
                    );
                }
                SyncEvent::ActionAcknowledged(request_id) => {
                    println!("[{}] acknowledged {}", now, request_id)
                }
                SyncEvent::ActionRejected {
                    action, reason, ..
                } => println!("[{}] {} rejected: {}", now, action, reason),
                SyncEvent::MessageDropped(reason) => {
                    println!("[{}] dropped malformed frame: {}", now, reason)
                }
                SyncEvent::ActionsLost(count) => {
                    println!("[{}] {} action(s) lost on disconnect", now, count)
                }
            }
        }
        OutputFormat::Quiet => {}
    }
}

/// One JSON line per event; state changes carry the collections that changed
fn event_json(sync: &Synchronizer, event: &SyncEvent) -> Option<serde_json::Value> {
    let json = match event {
        SyncEvent::StatusChanged(status) => {
            serde_json::json!({"event": "status", "status": status.to_string()})
        }
        SyncEvent::StateChanged(changed) => {
            let view = sync.view();
            let mut json = serde_json::json!({"event": "state"});
            if changed.customers {
                json["customer"] = serde_json::to_value(&view.customers).ok()?;
            }
            if changed.items {
                json["item"] = serde_json::to_value(&view.items).ok()?;
            }
            json
        }
        SyncEvent::ActionAcknowledged(request_id) => {
            serde_json::json!({"event": "ack", "request_id": request_id})
        }
        SyncEvent::ActionRejected {
            request_id,
            action,
            reason,
        } => serde_json::json!({
            "event": "rejected",
            "request_id": request_id,
            "action": action.to_string(),
            "reason": reason
        }),
        SyncEvent::MessageDropped(reason) => {
            serde_json::json!({"event": "dropped", "reason": reason})
        }
        SyncEvent::ActionsLost(count) => serde_json::json!({"event": "lost", "count": count}),
    };
    Some(json)
}
