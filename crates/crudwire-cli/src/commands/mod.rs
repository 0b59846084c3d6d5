//! Command handlers

pub mod config;
pub mod customer;
pub mod item;
pub mod send;
pub mod status;
pub mod watch;

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crudwire_core::{ActionKind, Config, Confirmation, Domain, Payload, Record, Session};

/// Connect and wait until the server has sent both collections
///
/// With `resync_on_connect` disabled only the socket is awaited, since nothing
/// would prompt the server to send a snapshot.
pub async fn connect(config: &Config) -> Result<Session> {
    let session = Session::start(config);
    let timeout = config.connect_timeout() + config.confirm_timeout();

    let ready = if config.resync_on_connect {
        session.wait_until_synced(&Domain::ALL, timeout).await
    } else {
        session.wait_until_open(timeout).await.map(|_| ())
    };

    if let Err(e) = ready {
        session.shutdown().await;
        let mut hint = e
            .recovery_suggestion()
            .map(|hint| format!("\n{}", hint))
            .unwrap_or_default();
        if e.is_retryable() {
            hint.push_str("\nThe client reconnects every few seconds; running the command again may succeed.");
        }
        bail!("Could not reach {}: {}{}", config.server_url, e, hint);
    }

    debug!("Session ready");
    Ok(session)
}

/// Send an action and fail unless the server confirms it
pub async fn perform(
    session: &Session,
    config: &Config,
    action: ActionKind,
    payload: Payload,
) -> Result<Confirmation> {
    let confirmation = session
        .synchronizer()
        .send_and_confirm(action, payload, config.confirm_timeout())
        .await
        .with_context(|| format!("Failed to send {}", action))?;
    check_confirmation(action, confirmation)
}

/// Turn a rejected or lost action into an error
pub fn check_confirmation(action: ActionKind, confirmation: Confirmation) -> Result<Confirmation> {
    match confirmation {
        Confirmation::Rejected(reason) => bail!("Server rejected {}: {}", action, reason),
        Confirmation::Lost => bail!(
            "Connection closed before the server answered {}. Check the current state with `list`.",
            action
        ),
        confirmation => Ok(confirmation),
    }
}

/// Resolve a full id or unique prefix against the known records
pub fn resolve_id<R: Record>(kind: &str, input: &str, records: &[R]) -> Result<String> {
    if records.iter().any(|r| r.id() == input) {
        return Ok(input.to_string());
    }

    let matches: Vec<&R> = records.iter().filter(|r| r.id().starts_with(input)).collect();

    match matches.len() {
        0 => bail!("No {} found matching: {}", kind, input),
        1 => Ok(matches[0].id().to_string()),
        _ => {
            eprintln!("Multiple {}s match '{}':", kind, input);
            for record in &matches {
                eprintln!("  {}", record.id());
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Records present after an action that were not there before
pub fn new_records<R: Record>(before: &[R], after: &[R]) -> Vec<R> {
    let known: HashSet<&str> = before.iter().map(|r| r.id()).collect();
    after
        .iter()
        .filter(|r| !known.contains(r.id()))
        .cloned()
        .collect()
}
