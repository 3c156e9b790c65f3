use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use fedids_core::he::global_context;
use fedids_core::telemetry::{HttpTelemetry, TelemetrySink};
use fedids_core::{HeParams, LayerSelection, ServerConfig};
use fl_server::aggregator::{AggregationStrategy, CkksFedAvg, PlainFedAvg};
use fl_server::clients::{ClientPool, InProcessClient};
use fl_server::coordinator::Coordinator;
use fl_server::session::Session;
use fl_trainer::dataset::SyntheticPartition;
use fl_trainer::model::IdsModel;
use fl_trainer::LocalTrainer;

const INPUT_DIM: usize = 16;
const HIDDEN_DIM: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ServerConfig::from_env();
    info!(target: "fl-server", rounds = config.rounds, use_he = config.use_he, "Starting fl-server service");

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(HttpTelemetry::new(&config.backend_url));

    let strategy: Box<dyn AggregationStrategy> = if config.use_he {
        let ctx = global_context(HeParams {
            poly_modulus_degree: config.he_poly_modulus,
            scale_bits: config.he_scale_bits,
        });
        Box::new(CkksFedAvg::new(
            ctx,
            LayerSelection::from_csv(&config.selected_layers),
        ))
    } else {
        Box::new(PlainFedAvg)
    };

    // Embedded simulation mode: each registered client trains in-process on
    // its own deterministic partition.
    let pool = Arc::new(ClientPool::new());
    for i in 0..config.min_available_clients.max(config.min_fit_clients) {
        let client_id = format!("client_{i}");
        let partition = SyntheticPartition::new(1000 + i as u64, 2048, INPUT_DIM, 0.3);
        let trainer = LocalTrainer::new(&client_id, partition, telemetry.clone());
        pool.register(Arc::new(InProcessClient::new(trainer)));
        info!(client_id, "client registered");
    }

    let initial_global = IdsModel::new(INPUT_DIM, HIDDEN_DIM, 42).state();
    let coordinator = Coordinator::new(config, pool, strategy, initial_global, telemetry.clone());
    let mut session = Session::new(coordinator, telemetry);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    let report = session.run(stop_rx).await?;
    info!(
        rounds_completed = report.rounds_completed,
        rounds_skipped = report.rounds_skipped,
        final_model = %report.final_model_path,
        "fl-server done"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
