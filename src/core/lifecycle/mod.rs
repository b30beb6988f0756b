//! Process exit. Every way the beacon can end goes through [`terminate`], so
//! the exit codes below are the whole contract with a supervising process.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::controller::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Consecutive failed check-ins reached the threshold.
    RetriesExhausted,
    /// The controller never accepted the registration.
    RegistrationFailed,
    /// A `kill` task was received.
    KillTask,
    /// SIGINT or SIGTERM.
    Signal,
    EntropyUnavailable,
    BadConfig,
}

/// Outcome of removing our own executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfRemoval {
    Removed,
    RemoveFailed,
    PathUnresolved,
    /// Running without a backing file (already deleted or memory-backed).
    NotOnDisk,
}

impl SelfRemoval {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::NotOnDisk => 0,
            Self::Removed => 1,
            Self::RemoveFailed => 2,
            Self::PathUnresolved => 3,
        }
    }
}

pub const SIGNAL_EXIT_CODE: i32 = 5;
pub const ENTROPY_EXIT_CODE: i32 = 4;
pub const CONFIG_EXIT_CODE: i32 = 6;

pub fn remove_executable(exe: std::io::Result<PathBuf>) -> SelfRemoval {
    let Ok(path) = exe else {
        return SelfRemoval::PathUnresolved;
    };
    if !path.exists() {
        return SelfRemoval::NotOnDisk;
    }
    match std::fs::remove_file(&path) {
        Ok(()) => SelfRemoval::Removed,
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            SelfRemoval::RemoveFailed
        }
    }
}

/// Exit code for `reason`, removing the executable first where the reason calls for it.
pub fn resolve_exit_code(reason: ExitReason) -> i32 {
    match reason {
        ExitReason::Signal => SIGNAL_EXIT_CODE,
        ExitReason::EntropyUnavailable => ENTROPY_EXIT_CODE,
        ExitReason::BadConfig => CONFIG_EXIT_CODE,
        ExitReason::RetriesExhausted | ExitReason::RegistrationFailed | ExitReason::KillTask => {
            remove_executable(std::env::current_exe()).exit_code()
        }
    }
}

pub fn terminate(reason: ExitReason) -> ! {
    let code = resolve_exit_code(reason);
    info!("Terminating ({:?}), exit code {}", reason, code);
    std::process::exit(code)
}

/// Resolves once SIGINT or SIGTERM arrives.
pub async fn wait_for_stop_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

/// Waits for `stop`, then sends the death notice for `session`. Returns the
/// reason to exit with, or `None` when the stop source itself failed.
pub async fn on_stop(
    stop: impl Future<Output = std::io::Result<()>>,
    controller: &dyn Controller,
    session: &str,
) -> Option<ExitReason> {
    if let Err(e) = stop.await {
        warn!("Signal listener unavailable: {}", e);
        return None;
    }
    info!("Stop signal received");
    if let Err(e) = controller.death_notice(session).await {
        debug!("Death notice failed: {:#}", e);
    }
    Some(ExitReason::Signal)
}

/// Watches for a stop signal independently of the beacon loop. On receipt it
/// sends the death notice and exits, whatever the loop is doing.
pub fn spawn_signal_listener(controller: Arc<dyn Controller>, session: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(reason) = on_stop(wait_for_stop_signal(), controller.as_ref(), &session).await {
            terminate(reason);
        }
    })
}
