//! Shared library for the federated IDS training system: tensor/model
//! types, the coordinator<->client fit contract, the CKKS-style encryption
//! backend used for secure aggregation, configuration, and best-effort
//! telemetry.

pub mod config;
pub mod error;
pub mod he;
pub mod protocol;
pub mod telemetry;
pub mod tensor;

pub use config::{ClientConfig, ServerConfig};
pub use error::FlError;
pub use he::{CkksContext, CkksVector, HeParams};
pub use protocol::{ClientFailure, FitConfig, FitInstruction, FitMetrics, FitResult};
pub use telemetry::{
    ClientMetric, HttpTelemetry, NullTelemetry, ProgressEvent, RecordingTelemetry, RoundEvent,
    SessionStatus, StatusEvent, TelemetrySink, TrainingPhase,
};
pub use tensor::{LayerSelection, ModelState, Tensor};
