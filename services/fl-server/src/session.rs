//! Training session: the sequential round loop.
//!
//! Wraps the coordinator with session lifecycle concerns: start and end
//! status events, the training history file, cooperative shutdown at round
//! boundaries, and the final model snapshot. A round that collects nothing
//! is skipped with a warning; losing quorum ends the session.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{error, info, warn};

use fedids_core::telemetry::{SessionStatus, StatusEvent, TelemetrySink};
use fedids_core::FlError;

use crate::checkpoint::HistoryStore;
use crate::coordinator::{Coordinator, RoundPhase};

pub struct Session {
    coordinator: Coordinator,
    history: HistoryStore,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub rounds_completed: u32,
    pub rounds_skipped: u32,
    pub final_model_path: String,
}

impl Session {
    pub fn new(coordinator: Coordinator, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let history = HistoryStore::new(&coordinator.config().model_dir);
        Self {
            coordinator,
            history,
            telemetry,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Runs rounds `1..=rounds` to completion. `stop` is checked between
    /// rounds only; a round in flight always finishes.
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> anyhow::Result<SessionReport> {
        let total_rounds = self.coordinator.config().rounds;
        let use_he = self.coordinator.config().use_he;
        let mut rounds_completed = 0u32;
        let mut rounds_skipped = 0u32;

        self.post_status(SessionStatus::Started, total_rounds, rounds_completed, None);
        info!(total_rounds, use_he, "training session started");

        for round in 1..=total_rounds {
            if *stop.borrow() {
                info!(round, "stop requested, ending session at round boundary");
                break;
            }

            let setup = match self.coordinator.configure(round) {
                Ok(setup) => setup,
                Err(e @ FlError::ClientUnavailable { .. }) => {
                    error!(round, error = %e, "quorum lost, session failed");
                    self.coordinator.set_phase(RoundPhase::Failed);
                    self.post_status(SessionStatus::Failed, total_rounds, rounds_completed, None);
                    self.history.flush()?;
                    return Err(e.into());
                }
                Err(e) => {
                    self.coordinator.set_phase(RoundPhase::Failed);
                    self.post_status(SessionStatus::Failed, total_rounds, rounds_completed, None);
                    self.history.flush()?;
                    return Err(e.into());
                }
            };
            let started = Instant::now();
            let (results, failures) = self.coordinator.collect(&setup).await;

            match self.coordinator.finalize(&setup, results, failures, started).await {
                Ok(outcome) => {
                    self.history.append(outcome.metric);
                    self.history.flush()?;
                    rounds_completed += 1;
                }
                Err(e) => match e.downcast_ref::<FlError>() {
                    Some(FlError::AggregationInputEmpty { .. }) => {
                        warn!(round, "no usable results, round skipped");
                        rounds_skipped += 1;
                    }
                    _ => {
                        error!(round, error = %e, "round failed, session aborted");
                        self.coordinator.set_phase(RoundPhase::Failed);
                        self.post_status(
                            SessionStatus::Failed,
                            total_rounds,
                            rounds_completed,
                            None,
                        );
                        self.history.flush()?;
                        return Err(e);
                    }
                },
            }
        }

        let final_path = self
            .coordinator
            .checkpoints()
            .save_final(&self.coordinator.global_snapshot())?;
        self.history.flush()?;
        let final_model_path = final_path.to_string_lossy().into_owned();
        self.coordinator.set_phase(RoundPhase::Complete);
        self.post_status(
            SessionStatus::Completed,
            total_rounds,
            rounds_completed,
            Some(final_model_path.clone()),
        );
        info!(rounds_completed, rounds_skipped, path = %final_model_path, "training session finished");

        Ok(SessionReport {
            rounds_completed,
            rounds_skipped,
            final_model_path,
        })
    }

    fn post_status(
        &self,
        status: SessionStatus,
        total_rounds: u32,
        rounds_completed: u32,
        model_path: Option<String>,
    ) {
        self.telemetry.post_status(StatusEvent {
            status,
            total_rounds,
            rounds_completed,
            num_clients: self.coordinator.config().min_fit_clients,
            use_he: self.coordinator.config().use_he,
            model_path,
        });
    }
}
