//! Raw action command

use anyhow::{Context, Result};
use serde_json::Value;

use crudwire_core::{ActionKind, Config, Confirmation, Session};

use super::check_confirmation;
use crate::output::Output;

/// Send `<domain>:<verb>` with a JSON array payload
///
/// With `no_wait` the command returns as soon as the frame is written and
/// prints the request id; otherwise it waits for the server and prints the
/// resulting view.
pub async fn send(
    session: &Session,
    config: &Config,
    action: String,
    payload: String,
    no_wait: bool,
    output: &Output,
) -> Result<()> {
    let kind: ActionKind = action.parse()?;
    let payload: Value = serde_json::from_str(&payload)
        .with_context(|| format!("Payload is not valid JSON: {}", payload))?;
    let sync = session.synchronizer();

    if no_wait {
        let request_id = sync
            .send_json(kind, payload)
            .await
            .with_context(|| format!("Failed to send {}", kind))?;
        output.success(&format!("Sent {} ({})", kind, request_id));
        if output.is_quiet() {
            println!("{}", request_id);
        }
        return Ok(());
    }

    let confirmation = sync
        .send_json_and_confirm(kind, payload, config.confirm_timeout())
        .await
        .with_context(|| format!("Failed to send {}", kind))?;
    let confirmation = check_confirmation(kind, confirmation)?;

    output.success(&format!("{} {}", kind, describe(&confirmation)));
    output.print_view(&sync.view());
    Ok(())
}

fn describe(confirmation: &Confirmation) -> &'static str {
    match confirmation {
        Confirmation::Acknowledged => "acknowledged",
        Confirmation::ConfirmedBySnapshot => "confirmed by snapshot",
        Confirmation::Rejected(_) => "rejected",
        Confirmation::Lost => "lost",
    }
}
