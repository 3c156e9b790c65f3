//! Client-side local training.
//!
//! `LocalTrainer` implements the fit contract: load the received global
//! parameters, train them on the private partition for the instructed number
//! of epochs/batches, and return updated parameters plus self-reported
//! metrics carrying the durable client id. Progress telemetry is throttled
//! and strictly best-effort.

pub mod dataset;
pub mod model;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use fedids_core::telemetry::{now_rfc3339, ProgressEvent, TelemetrySink, TrainingPhase};
use fedids_core::{FitInstruction, FitMetrics, FitResult};

pub use dataset::SyntheticPartition;
pub use model::IdsModel;

/// Minimum interval between progress events. The final batch always
/// reports regardless.
const PROGRESS_THROTTLE: Duration = Duration::from_secs(2);

pub struct LocalTrainer {
    client_id: String,
    dataset: SyntheticPartition,
    telemetry: Arc<dyn TelemetrySink>,
    progress_interval: Duration,
}

impl LocalTrainer {
    pub fn new(
        client_id: impl Into<String>,
        dataset: SyntheticPartition,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            dataset,
            telemetry,
            progress_interval: PROGRESS_THROTTLE,
        }
    }

    /// Overrides the progress throttle, mainly for tests.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Trains the received parameters and returns the updated values (not
    /// deltas) for every layer.
    pub fn fit(&self, instruction: &FitInstruction) -> Result<FitResult> {
        let cfg = &instruction.config;
        let mut model = IdsModel::from_state(&instruction.parameters)?;
        anyhow::ensure!(
            model.input_dim() == self.dataset.input_dim(),
            "model expects {} features, partition has {}",
            model.input_dim(),
            self.dataset.input_dim()
        );

        info!(
            client = %self.client_id,
            round = cfg.server_round,
            total_rounds = cfg.total_rounds,
            epochs = cfg.local_epochs,
            lr = cfg.lr,
            max_batches = cfg.max_batches,
            "starting local training"
        );

        let epochs = cfg.local_epochs.max(1);
        let batches_per_epoch = self
            .dataset
            .batches(cfg.batch_size, 0)
            .len()
            .min(cfg.max_batches.max(1));
        let grand_total_batches = (batches_per_epoch as u64) * epochs as u64;
        let samples_per_epoch = self
            .dataset
            .len()
            .min(cfg.max_batches.max(1) * cfg.batch_size.max(1)) as u64;
        let grand_total_samples = samples_per_epoch * epochs as u64;

        let t0 = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut total_loss = 0.0;
        let mut total_correct = 0u64;
        let mut total_samples = 0u64;
        let mut batches_processed = 0u64;

        for epoch in 1..=epochs {
            for batch in self
                .dataset
                .batches(cfg.batch_size, (cfg.server_round as u64) << 16 | epoch as u64)
                .into_iter()
                .take(cfg.max_batches.max(1))
            {
                let (loss_sum, correct) = model.train_batch(&batch, cfg.lr);
                total_loss += loss_sum;
                total_correct += correct as u64;
                total_samples += batch.len() as u64;
                batches_processed += 1;

                let is_final = batches_processed == grand_total_batches;
                let due = match last_report {
                    None => true,
                    Some(at) => at.elapsed() >= self.progress_interval,
                };
                if due || is_final {
                    last_report = Some(Instant::now());
                    self.post_progress(cfg, epoch, batches_processed, grand_total_batches,
                        total_samples, grand_total_samples, total_loss, total_correct, t0);
                }
            }
        }

        let elapsed = t0.elapsed().as_secs_f64();
        let loss = total_loss / total_samples.max(1) as f64;
        let accuracy = total_correct as f64 / total_samples.max(1) as f64;
        info!(
            client = %self.client_id,
            round = cfg.server_round,
            loss,
            accuracy,
            samples = total_samples,
            elapsed_sec = elapsed,
            "local training complete"
        );

        self.telemetry.post_progress(ProgressEvent {
            client_id: self.client_id.clone(),
            round: cfg.server_round,
            total_rounds: cfg.total_rounds,
            phase: TrainingPhase::SendingWeights,
            epoch: epochs,
            total_epochs: epochs,
            batches_processed,
            grand_total_batches,
            samples_processed: total_samples,
            total_samples: grand_total_samples,
            throughput: total_samples as f64 / elapsed.max(1e-3),
            eta_seconds: 0.0,
            current_loss: loss,
            current_accuracy: accuracy,
            last_update_time: now_rfc3339(),
            message: format!(
                "Round {}/{} training complete, sending weights",
                cfg.server_round, cfg.total_rounds
            ),
        });

        Ok(FitResult {
            parameters: model.state(),
            num_examples: total_samples,
            metrics: FitMetrics {
                client_id: self.client_id.clone(),
                loss,
                accuracy,
                training_time_sec: elapsed,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn post_progress(
        &self,
        cfg: &fedids_core::FitConfig,
        epoch: u32,
        batches_processed: u64,
        grand_total_batches: u64,
        samples_processed: u64,
        grand_total_samples: u64,
        total_loss: f64,
        total_correct: u64,
        t0: Instant,
    ) {
        let elapsed = t0.elapsed().as_secs_f64();
        let throughput = samples_processed as f64 / elapsed.max(1e-3);
        let remaining = grand_total_samples.saturating_sub(samples_processed);
        let eta_seconds = remaining as f64 / throughput.max(1e-3);
        let current_loss = total_loss / samples_processed.max(1) as f64;
        let current_accuracy = total_correct as f64 / samples_processed.max(1) as f64;
        self.telemetry.post_progress(ProgressEvent {
            client_id: self.client_id.clone(),
            round: cfg.server_round,
            total_rounds: cfg.total_rounds,
            phase: TrainingPhase::Training,
            epoch,
            total_epochs: cfg.local_epochs.max(1),
            batches_processed,
            grand_total_batches,
            samples_processed,
            total_samples: grand_total_samples,
            throughput,
            eta_seconds: eta_seconds.max(0.0),
            current_loss,
            current_accuracy,
            last_update_time: now_rfc3339(),
            message: format!(
                "Epoch {}/{} Batch {}/{} - loss={:.4} acc={:.4} {:.0} samp/s",
                epoch,
                cfg.local_epochs.max(1),
                batches_processed,
                grand_total_batches,
                current_loss,
                current_accuracy,
                throughput
            ),
        });
    }
}
