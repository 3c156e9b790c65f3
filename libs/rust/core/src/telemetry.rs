//! Best-effort telemetry events and the sink that delivers them.
//!
//! Delivery is fire-and-forget: the HTTP sink spawns the POST off the
//! caller's path with a short timeout, logs failures and never surfaces
//! them. Slow or unreachable telemetry must not stall a round or a training
//! loop.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Phase tag carried by progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Training,
    SendingWeights,
    Aggregating,
    Encrypting,
}

/// Per-batch training progress, throttled at the emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub client_id: String,
    pub round: u32,
    pub total_rounds: u32,
    pub phase: TrainingPhase,
    pub epoch: u32,
    pub total_epochs: u32,
    pub batches_processed: u64,
    pub grand_total_batches: u64,
    pub samples_processed: u64,
    pub total_samples: u64,
    /// Samples per second over the whole fit so far.
    pub throughput: f64,
    pub eta_seconds: f64,
    pub current_loss: f64,
    pub current_accuracy: f64,
    pub last_update_time: String,
    pub message: String,
}

/// One client's contribution to a completed round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetric {
    pub client_id: String,
    pub local_loss: f64,
    pub local_accuracy: f64,
    pub num_samples: u64,
    pub training_time_sec: f64,
    pub encrypted: bool,
}

/// Emitted once per successful round, after checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEvent {
    pub round_number: u32,
    pub total_rounds: u32,
    pub num_clients: usize,
    pub aggregation_method: String,
    pub he_scheme: Option<String>,
    pub he_poly_modulus: Option<usize>,
    pub duration_seconds: f64,
    pub global_loss: f64,
    pub global_accuracy: f64,
    pub client_metrics: Vec<ClientMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Completed,
    Failed,
}

/// Session-level lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: SessionStatus,
    pub total_rounds: u32,
    pub rounds_completed: u32,
    pub num_clients: usize,
    pub use_he: bool,
    pub model_path: Option<String>,
}

/// Non-blocking notification channel. Implementations swallow every
/// delivery failure; callers rely on that contract.
pub trait TelemetrySink: Send + Sync {
    fn post_progress(&self, event: ProgressEvent);
    fn post_round(&self, event: RoundEvent);
    fn post_status(&self, event: StatusEvent);
}

/// Discards everything. Used in tests and when no backend is configured.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn post_progress(&self, _event: ProgressEvent) {}
    fn post_round(&self, _event: RoundEvent) {}
    fn post_status(&self, _event: StatusEvent) {}
}

/// Captures events in memory so tests can assert on emission order and
/// payloads.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    pub progress: Mutex<Vec<ProgressEvent>>,
    pub rounds: Mutex<Vec<RoundEvent>>,
    pub statuses: Mutex<Vec<StatusEvent>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn post_progress(&self, event: ProgressEvent) {
        self.progress.lock().push(event);
    }
    fn post_round(&self, event: RoundEvent) {
        self.rounds.lock().push(event);
    }
    fn post_status(&self, event: StatusEvent) {
        self.statuses.lock().push(event);
    }
}

/// POSTs events as JSON to the backend's internal FL endpoints.
pub struct HttpTelemetry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTelemetry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn post<T: Serialize>(&self, path: &str, event: &T) {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let body = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path, "telemetry event not serializable, dropped");
                return;
            }
        };
        let client = self.client.clone();
        // Off the critical path; requires a running runtime, which both
        // binaries guarantee.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => warn!(%url, status = %resp.status(), "telemetry POST rejected"),
                    Err(e) => debug!(%url, error = %e, "telemetry POST failed"),
                }
            });
        } else {
            debug!(%url, "no runtime for telemetry POST, event dropped");
        }
    }
}

impl TelemetrySink for HttpTelemetry {
    fn post_progress(&self, event: ProgressEvent) {
        self.post("/api/v1/internal/fl/progress", &event);
    }
    fn post_round(&self, event: RoundEvent) {
        self.post("/api/v1/internal/fl/round", &event);
    }
    fn post_status(&self, event: StatusEvent) {
        self.post("/api/v1/internal/fl/status", &event);
    }
}

/// RFC 3339 UTC timestamp for event payloads.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
