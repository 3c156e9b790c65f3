use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use fedids_core::telemetry::{HttpTelemetry, TelemetrySink};
use fedids_core::{ClientConfig, FitConfig, FitInstruction};
use fl_trainer::{IdsModel, LocalTrainer, SyntheticPartition};

const INPUT_DIM: usize = 16;
const HIDDEN_DIM: usize = 8;

/// Standalone client mode: trains one local fit on the private partition and
/// reports progress to the backend. Used to exercise a client's data and
/// telemetry path without a coordinator.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ClientConfig::from_env();
    info!(target: "fl-client", client_id = %config.client_id, "Starting fl-client service");

    let seed = config.data_seed.unwrap_or_else(|| {
        let mut hasher = DefaultHasher::new();
        config.client_id.hash(&mut hasher);
        hasher.finish()
    });
    let partition = SyntheticPartition::new(seed, config.num_samples, INPUT_DIM, 0.3);
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(HttpTelemetry::new(&config.backend_url));
    let trainer = LocalTrainer::new(config.client_id.clone(), partition, telemetry);

    let instruction = FitInstruction {
        parameters: IdsModel::new(INPUT_DIM, HIDDEN_DIM, seed).state(),
        config: FitConfig {
            server_round: 1,
            total_rounds: 1,
            local_epochs: 1,
            lr: 0.001,
            use_he: false,
            batch_size: 32,
            max_batches: 50,
        },
    };

    let trainer = Arc::new(trainer);
    let result = tokio::task::spawn_blocking({
        let trainer = trainer.clone();
        move || trainer.fit(&instruction)
    })
    .await??;

    info!(
        client_id = %result.metrics.client_id,
        loss = result.metrics.loss,
        accuracy = result.metrics.accuracy,
        num_examples = result.num_examples,
        training_time_sec = result.metrics.training_time_sec,
        "local fit finished"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
