//! Environment-driven configuration.
//!
//! Every knob is a `FEDIDS_*` env var with a sensible default; malformed
//! values fall back to the default with a warning rather than aborting
//! startup.

use std::fmt::Debug;
use std::str::FromStr;

use tracing::warn;

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Debug,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, default = ?default, "invalid env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Server-side session configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rounds: u32,
    pub min_available_clients: usize,
    pub min_fit_clients: usize,
    pub local_epochs: u32,
    pub lr: f64,
    pub batch_size: usize,
    pub max_batches: usize,
    pub use_he: bool,
    pub he_poly_modulus: usize,
    pub he_scale_bits: u32,
    /// Comma-separated layer names aggregated under HE.
    pub selected_layers: String,
    /// Collection window for one round, in seconds.
    pub collect_window_secs: u64,
    pub model_dir: String,
    pub backend_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let min_available = env_parse("FEDIDS_MIN_CLIENTS", 2usize);
        Self {
            rounds: env_parse("FEDIDS_ROUNDS", 5),
            min_available_clients: min_available,
            min_fit_clients: env_parse("FEDIDS_MIN_FIT_CLIENTS", min_available),
            local_epochs: env_parse("FEDIDS_LOCAL_EPOCHS", 1),
            lr: env_parse("FEDIDS_LR", 0.001),
            batch_size: env_parse("FEDIDS_BATCH_SIZE", 32usize),
            max_batches: env_parse("FEDIDS_MAX_BATCHES", 50usize),
            use_he: env_bool("FEDIDS_USE_HE", true),
            he_poly_modulus: env_parse("FEDIDS_HE_POLY_MODULUS", 8192usize),
            he_scale_bits: env_parse("FEDIDS_HE_SCALE_BITS", 40u32),
            selected_layers: env_string(
                "FEDIDS_SELECTED_LAYERS",
                "classifier.weight,classifier.bias",
            ),
            collect_window_secs: env_parse("FEDIDS_COLLECT_WINDOW_SECS", 120u64),
            model_dir: env_string("FEDIDS_MODEL_DIR", "./models"),
            backend_url: env_string("FEDIDS_BACKEND_URL", "http://127.0.0.1:8000"),
        }
    }
}

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Durable identity assigned at registration.
    pub client_id: String,
    pub backend_url: String,
    /// Size of the private data partition.
    pub num_samples: usize,
    /// Seed for the deterministic partition; defaults to a hash of the id.
    pub data_seed: Option<u64>,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: env_string("FEDIDS_CLIENT_ID", "client_0"),
            backend_url: env_string("FEDIDS_BACKEND_URL", "http://127.0.0.1:8000"),
            num_samples: env_parse("FEDIDS_NUM_SAMPLES", 2048usize),
            data_seed: std::env::var("FEDIDS_DATA_SEED")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}
