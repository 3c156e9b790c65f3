//! Round orchestration: configure, collect, finalize.
//!
//! One coordinator drives one training session. Rounds are strictly
//! sequential; within a round the sampled clients train concurrently and
//! their results are collected under a bounded window. The global model is
//! only ever replaced whole, after aggregation succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};

use fedids_core::telemetry::{
    now_rfc3339, ClientMetric, ProgressEvent, RoundEvent, TelemetrySink, TrainingPhase,
};
use fedids_core::{
    ClientFailure, FitConfig, FitInstruction, FitResult, FlError, ModelState, ServerConfig,
};

use crate::aggregator::AggregationStrategy;
use crate::checkpoint::{CheckpointStore, RoundMetric};
use crate::clients::{ClientPool, ClientProxy};

/// Observable state of the round in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Configuring,
    AwaitingResults,
    Aggregating,
    Checkpointing,
    Reported,
    Complete,
    Failed,
}

pub type PhaseCell = Arc<RwLock<RoundPhase>>;

/// Everything a started round needs before dispatch.
#[derive(Debug)]
pub struct RoundSetup {
    pub round: u32,
    pub participants: Vec<Arc<dyn ClientProxy>>,
    pub instruction: FitInstruction,
}

/// Result of a finalized round, handed back to the session loop.
#[derive(Debug)]
pub struct RoundOutcome {
    pub metric: RoundMetric,
    pub failures: Vec<ClientFailure>,
}

pub struct Coordinator {
    config: ServerConfig,
    pool: Arc<ClientPool>,
    strategy: Box<dyn AggregationStrategy>,
    global: Mutex<ModelState>,
    checkpoints: CheckpointStore,
    telemetry: Arc<dyn TelemetrySink>,
    phase: PhaseCell,
}

impl Coordinator {
    pub fn new(
        config: ServerConfig,
        pool: Arc<ClientPool>,
        strategy: Box<dyn AggregationStrategy>,
        initial_global: ModelState,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let checkpoints = CheckpointStore::new(config.model_dir.clone());
        Self {
            config,
            pool,
            strategy,
            global: Mutex::new(initial_global),
            checkpoints,
            telemetry,
            phase: Arc::new(RwLock::new(RoundPhase::Idle)),
        }
    }

    pub fn phase_cell(&self) -> PhaseCell {
        self.phase.clone()
    }

    pub fn set_phase(&self, phase: RoundPhase) {
        *self.phase.write() = phase;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whole-state snapshot of the current global model.
    pub fn global_snapshot(&self) -> ModelState {
        self.global.lock().clone()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Samples participants for `round` and packages the dispatch payload.
    /// Refuses to start under quorum.
    pub fn configure(&self, round: u32) -> Result<RoundSetup, FlError> {
        self.set_phase(RoundPhase::Configuring);
        let participants = self
            .pool
            .sample(self.config.min_fit_clients, self.config.min_available_clients)?;
        info!(
            round,
            participants = participants.len(),
            available = self.pool.available(),
            "round configured"
        );
        let instruction = FitInstruction {
            parameters: self.global_snapshot(),
            config: FitConfig {
                server_round: round,
                total_rounds: self.config.rounds,
                local_epochs: self.config.local_epochs,
                lr: self.config.lr,
                use_he: self.config.use_he,
                batch_size: self.config.batch_size,
                max_batches: self.config.max_batches,
            },
        };
        Ok(RoundSetup {
            round,
            participants,
            instruction,
        })
    }

    /// Dispatches the fit instruction to every participant concurrently and
    /// collects results until all respond or the window closes. A failed or
    /// late client becomes a `ClientFailure`, never an abort.
    pub async fn collect(&self, setup: &RoundSetup) -> (Vec<FitResult>, Vec<ClientFailure>) {
        self.set_phase(RoundPhase::AwaitingResults);
        let window = Duration::from_secs(self.config.collect_window_secs);
        let mut tasks: JoinSet<(String, anyhow::Result<FitResult>)> = JoinSet::new();
        for client in &setup.participants {
            let client = client.clone();
            let instruction = setup.instruction.clone();
            let id = client.client_id().to_string();
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(window, client.fit(instruction)).await {
                    Ok(res) => res,
                    Err(_) => Err(anyhow::anyhow!(
                        "no result within {}s collection window",
                        window.as_secs()
                    )),
                };
                (id, outcome)
            });
        }

        let expected_layers = &setup.instruction.parameters;
        let mut results = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (client_id, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "fit task aborted");
                    continue;
                }
            };
            match outcome {
                Ok(result) => match expected_layers.check_compatible(&result.parameters) {
                    Ok(()) => {
                        info!(
                            round = setup.round,
                            client_id,
                            num_examples = result.num_examples,
                            loss = result.metrics.loss,
                            "fit result accepted"
                        );
                        results.push(result);
                    }
                    Err(e) => {
                        warn!(round = setup.round, client_id, error = %e, "fit result incompatible");
                        failures.push(ClientFailure {
                            client_id,
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => {
                    warn!(round = setup.round, client_id, error = %e, "client fit failed");
                    failures.push(ClientFailure {
                        client_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (results, failures)
    }

    /// Aggregates the round's results, swaps the global model, writes the
    /// checkpoint and reports the round. Empty input aborts the round with
    /// the global model untouched.
    pub async fn finalize(
        &self,
        setup: &RoundSetup,
        results: Vec<FitResult>,
        failures: Vec<ClientFailure>,
        round_started: Instant,
    ) -> anyhow::Result<RoundOutcome> {
        let round = setup.round;
        if results.is_empty() {
            // Skipped round, not a dead session: the machine goes back to
            // Idle so the next round can configure. Failed is terminal.
            self.set_phase(RoundPhase::Idle);
            return Err(FlError::AggregationInputEmpty { round }.into());
        }

        self.set_phase(RoundPhase::Aggregating);
        if self.strategy.he_poly_modulus().is_some() {
            self.post_server_progress(round, TrainingPhase::Encrypting, "encrypting layer deltas");
        }
        self.post_server_progress(round, TrainingPhase::Aggregating, "aggregating client updates");

        let global_before = self.global_snapshot();
        let new_global = self.strategy.aggregate(&global_before, &results)?;
        global_before.check_compatible(&new_global)?;
        *self.global.lock() = new_global;

        self.set_phase(RoundPhase::Checkpointing);
        let snapshot = self.global_snapshot();
        self.checkpoints.save(round, &snapshot)?;

        // Sample-weighted means over the participating clients.
        let total_examples: u64 = results.iter().map(|r| r.num_examples).sum();
        let denom = total_examples.max(1) as f64;
        let global_loss = results
            .iter()
            .map(|r| r.metrics.loss * r.num_examples as f64)
            .sum::<f64>()
            / denom;
        let global_accuracy = results
            .iter()
            .map(|r| r.metrics.accuracy * r.num_examples as f64)
            .sum::<f64>()
            / denom;
        let duration_seconds = round_started.elapsed().as_secs_f64();

        let method = self.strategy.method();
        let encrypted = self.strategy.he_poly_modulus().is_some();
        let client_metrics: Vec<ClientMetric> = results
            .iter()
            .map(|r| ClientMetric {
                client_id: r.metrics.client_id.clone(),
                local_loss: r.metrics.loss,
                local_accuracy: r.metrics.accuracy,
                num_samples: r.num_examples,
                training_time_sec: r.metrics.training_time_sec,
                encrypted,
            })
            .collect();
        self.telemetry.post_round(RoundEvent {
            round_number: round,
            total_rounds: self.config.rounds,
            num_clients: results.len(),
            aggregation_method: method.as_str().to_string(),
            he_scheme: encrypted.then(|| "ckks".to_string()),
            he_poly_modulus: self.strategy.he_poly_modulus(),
            duration_seconds,
            global_loss,
            global_accuracy,
            client_metrics: client_metrics.clone(),
        });
        self.set_phase(RoundPhase::Reported);

        info!(
            round,
            clients = results.len(),
            failed = failures.len(),
            global_loss,
            global_accuracy,
            duration_seconds,
            "round finalized"
        );
        Ok(RoundOutcome {
            metric: RoundMetric {
                round,
                num_clients: results.len(),
                global_loss,
                global_accuracy,
                duration_seconds,
                aggregation_method: method.as_str().to_string(),
                client_metrics,
            },
            failures,
        })
    }

    fn post_server_progress(&self, round: u32, phase: TrainingPhase, message: &str) {
        self.telemetry.post_progress(ProgressEvent {
            client_id: "server".into(),
            round,
            total_rounds: self.config.rounds,
            phase,
            epoch: 0,
            total_epochs: 0,
            batches_processed: 0,
            grand_total_batches: 0,
            samples_processed: 0,
            total_samples: 0,
            throughput: 0.0,
            eta_seconds: 0.0,
            current_loss: 0.0,
            current_accuracy: 0.0,
            last_update_time: now_rfc3339(),
            message: message.to_string(),
        });
    }
}
