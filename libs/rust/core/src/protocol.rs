//! Coordinator <-> client fit contract.
//!
//! The connection layer that moves these messages is assumed; within a round
//! it delivers a `FitInstruction` to each sampled client and returns one
//! `FitResult` (or an error) per client. The durable `client_id` travels in
//! the result metrics so the coordinator can correlate results back to a
//! registered client without trusting any transport-level handle.

use serde::{Deserialize, Serialize};

use crate::tensor::ModelState;

/// Per-round hyperparameters distributed alongside the global parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitConfig {
    pub server_round: u32,
    pub total_rounds: u32,
    pub local_epochs: u32,
    pub lr: f64,
    pub use_he: bool,
    pub batch_size: usize,
    pub max_batches: usize,
}

/// Coordinator -> client: current global parameters plus round config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitInstruction {
    pub parameters: ModelState,
    pub config: FitConfig,
}

/// Metrics a client self-reports with its trained parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitMetrics {
    /// Durable registered identity, not an ephemeral connection handle.
    pub client_id: String,
    pub loss: f64,
    pub accuracy: f64,
    pub training_time_sec: f64,
}

/// Client -> coordinator: post-training parameter values (not deltas) for
/// every layer, plus the sample count used as the aggregation weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub parameters: ModelState,
    pub num_examples: u64,
    pub metrics: FitMetrics,
}

/// A client that errored or missed the collection window. Recorded for the
/// round report, excluded from aggregation; never aborts the round on its
/// own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFailure {
    pub client_id: String,
    pub reason: String,
}
