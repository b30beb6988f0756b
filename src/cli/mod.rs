use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::config::AgentConfig;
use crate::core::controller::{Controller, HttpController};
use crate::core::identity::{self, Identity};
use crate::core::lifecycle::{self, ExitReason};
use crate::core::scheduler::Scheduler;
use crate::logging;
use crate::platform::ProcFs;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BeaconFlags {
    pub config: Option<PathBuf>,
    pub server: Option<String>,
    pub verbose: bool,
}

pub(crate) fn parse_beacon_flags(args: &[String], start: usize) -> BeaconFlags {
    let mut flags = BeaconFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    flags.server = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

/// Flags win over the file, the file over built-in defaults.
pub(crate) fn apply_flags(mut config: AgentConfig, flags: &BeaconFlags) -> AgentConfig {
    if let Some(server) = &flags.server {
        config.server_url = server.clone();
    }
    config
}

/// Runs the beacon until it has a reason to stop. The caller turns the
/// reason into an exit code.
pub async fn run_main() -> ExitReason {
    let args: Vec<String> = std::env::args().collect();
    let flags = parse_beacon_flags(&args, 1);

    let config = match AgentConfig::load(flags.config.as_deref()).await {
        Ok(config) => apply_flags(config, &flags),
        Err(e) => {
            logging::init(logging::resolve_level(flags.verbose, None));
            error!("{:#}", e);
            return ExitReason::BadConfig;
        }
    };
    logging::init(logging::resolve_level(
        flags.verbose,
        config.log_level.as_deref(),
    ));

    let identity = match Identity::generate(&config.callback) {
        Ok(identity) => identity,
        Err(e) => {
            error!("No entropy for a session token: {}", e);
            return ExitReason::EntropyUnavailable;
        }
    };

    let controller: Arc<dyn Controller> =
        match HttpController::new(&config.server_url, config.request_timeout()) {
            Ok(controller) => Arc::new(controller),
            Err(e) => {
                error!("{:#}", e);
                return ExitReason::BadConfig;
            }
        };

    tokio::time::sleep(config.callback.start_delay()).await;
    info!("Registering with {}", config.server_url);
    if !identity::register(
        controller.as_ref(),
        &identity,
        &config.callback,
        config.registration_backoff(),
    )
    .await
    {
        return ExitReason::RegistrationFailed;
    }

    lifecycle::spawn_signal_listener(controller.clone(), identity.session.clone());

    Scheduler::new(
        controller,
        Box::new(ProcFs::default()),
        identity.session,
        config.callback,
    )
    .run()
    .await
}
