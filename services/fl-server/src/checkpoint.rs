//! Round checkpoints and training history on disk.
//!
//! Every finished round writes `fl_checkpoints/global_round_{r}.json` under
//! the configured model directory, and the session appends one record per
//! round to `fl_training_history.json`. Files are written whole; a partial
//! round leaves no file behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use fedids_core::telemetry::ClientMetric;
use fedids_core::ModelState;

const CHECKPOINT_DIR: &str = "fl_checkpoints";
const HISTORY_FILE: &str = "fl_training_history.json";
const FINAL_FILE: &str = "global_final.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub round: u32,
    pub model_state: ModelState,
}

/// One history entry per completed round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMetric {
    pub round: u32,
    pub num_clients: usize,
    pub global_loss: f64,
    pub global_accuracy: f64,
    pub duration_seconds: f64,
    pub aggregation_method: String,
    pub client_metrics: Vec<ClientMetric>,
}

pub struct CheckpointStore {
    model_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.model_dir.join(CHECKPOINT_DIR)
    }

    pub fn checkpoint_path(&self, round: u32) -> PathBuf {
        self.checkpoint_dir().join(format!("global_round_{round}.json"))
    }

    pub fn save(&self, round: u32, model_state: &ModelState) -> anyhow::Result<PathBuf> {
        let dir = self.checkpoint_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;
        let path = self.checkpoint_path(round);
        let checkpoint = Checkpoint {
            round,
            model_state: model_state.clone(),
        };
        write_json(&path, &checkpoint)?;
        info!(round, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    pub fn load(&self, round: u32) -> anyhow::Result<Checkpoint> {
        let path = self.checkpoint_path(round);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing checkpoint {}", path.display()))
    }

    /// Bare final snapshot, without the round wrapper.
    pub fn save_final(&self, model_state: &ModelState) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.model_dir)
            .with_context(|| format!("creating model dir {}", self.model_dir.display()))?;
        let path = self.model_dir.join(FINAL_FILE);
        write_json(&path, model_state)?;
        info!(path = %path.display(), "final model saved");
        Ok(path)
    }
}

pub struct HistoryStore {
    path: PathBuf,
    records: Vec<RoundMetric>,
}

impl HistoryStore {
    pub fn new(model_dir: impl AsRef<Path>) -> Self {
        Self {
            path: model_dir.as_ref().join(HISTORY_FILE),
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, record: RoundMetric) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[RoundMetric] {
        &self.records
    }

    /// Rewrites the whole file so a crash mid-session still leaves valid JSON.
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating model dir {}", parent.display()))?;
        }
        write_json(&self.path, &self.records)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing to json")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
