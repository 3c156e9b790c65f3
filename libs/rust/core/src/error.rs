//! Protocol error taxonomy.
//!
//! Only `ClientUnavailable` and `AggregationInputEmpty` influence round
//! scheduling. Per-client fit failures are carried as data
//! (`protocol::ClientFailure`), numeric instability is sanitized in place,
//! and telemetry delivery failures are logged and dropped at the call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlError {
    /// Fewer clients connected than the quorum requires; the round does not
    /// start.
    #[error("only {available} clients available, {required} required")]
    ClientUnavailable { available: usize, required: usize },

    /// Zero successful results were collected; the round aborts without
    /// touching the global model.
    #[error("round {round}: no successful client results to aggregate")]
    AggregationInputEmpty { round: u32 },

    /// A client result does not line up with the global model's layers.
    #[error("layer {layer:?}: {detail}")]
    LayerMismatch { layer: String, detail: String },

    /// Tensor shape/data length disagreement.
    #[error("tensor shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}
