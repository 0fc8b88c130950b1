//! Long-poll loop feeding bot updates into the control surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::control::ControlSurface;
use crate::relay::TelegramRelay;

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll until `shutdown` flips to true. Messages are handled one at a time
/// so an onboarding conversation sees its inputs in order.
pub async fn run(
    surface: Arc<ControlSurface>,
    relay: Arc<TelegramRelay>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset: i64 = 0;
    info!("Control surface listening for operator commands");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let updates = tokio::select! {
            _ = shutdown.changed() => break,
            result = relay.get_updates(offset, POLL_TIMEOUT_SECS) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Control poll failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            // Advance past this update even if handling it fails
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                surface.handle_message(relay.as_ref(), &message).await;
            }
        }
    }

    info!("Control surface stopped");
}
