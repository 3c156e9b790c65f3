//! End-to-end session runs with in-process clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use fedids_core::he::CkksContext;
use fedids_core::telemetry::{RecordingTelemetry, SessionStatus, TelemetrySink, TrainingPhase};
use fedids_core::{HeParams, LayerSelection, ServerConfig};
use fl_server::aggregator::{AggregationStrategy, CkksFedAvg, PlainFedAvg};
use fl_server::checkpoint::Checkpoint;
use fl_server::clients::{ClientPool, InProcessClient};
use fl_server::coordinator::Coordinator;
use fl_server::session::Session;
use fl_trainer::{IdsModel, LocalTrainer, SyntheticPartition};

const INPUT_DIM: usize = 4;
const HIDDEN_DIM: usize = 3;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fedids-session-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn session_config(model_dir: &PathBuf, rounds: u32, num_clients: usize) -> ServerConfig {
    let mut cfg = ServerConfig::from_env();
    cfg.rounds = rounds;
    cfg.min_available_clients = num_clients;
    cfg.min_fit_clients = num_clients;
    cfg.local_epochs = 1;
    cfg.batch_size = 16;
    cfg.max_batches = 4;
    cfg.collect_window_secs = 30;
    cfg.model_dir = model_dir.to_string_lossy().into_owned();
    cfg
}

fn pool_with_clients(num: usize, telemetry: Arc<dyn TelemetrySink>) -> Arc<ClientPool> {
    let pool = Arc::new(ClientPool::new());
    for i in 0..num {
        let partition = SyntheticPartition::new(500 + i as u64, 64, INPUT_DIM, 0.3);
        let trainer = LocalTrainer::new(format!("client_{i}"), partition, telemetry.clone());
        pool.register(Arc::new(InProcessClient::new(trainer)));
    }
    pool
}

fn build_session(
    config: ServerConfig,
    strategy: Box<dyn AggregationStrategy>,
    num_clients: usize,
    telemetry: Arc<RecordingTelemetry>,
) -> Session {
    let pool = pool_with_clients(num_clients, telemetry.clone());
    let initial = IdsModel::new(INPUT_DIM, HIDDEN_DIM, 7).state();
    let coordinator = Coordinator::new(config, pool, strategy, initial, telemetry.clone());
    Session::new(coordinator, telemetry)
}

#[tokio::test]
async fn plain_session_runs_all_rounds() {
    let dir = temp_dir("plain");
    let telemetry = Arc::new(RecordingTelemetry::default());
    let config = session_config(&dir, 3, 2);
    let mut session = build_session(config, Box::new(PlainFedAvg), 2, telemetry.clone());

    let (_tx, rx) = watch::channel(false);
    let report = session.run(rx).await.unwrap();
    assert_eq!(report.rounds_completed, 3);
    assert_eq!(report.rounds_skipped, 0);

    // One checkpoint per round plus the final snapshot.
    for round in 1..=3u32 {
        assert!(dir
            .join("fl_checkpoints")
            .join(format!("global_round_{round}.json"))
            .exists());
    }
    assert!(dir.join("global_final.json").exists());

    let statuses = telemetry.statuses.lock();
    assert_eq!(statuses.first().unwrap().status, SessionStatus::Started);
    let last = statuses.last().unwrap();
    assert_eq!(last.status, SessionStatus::Completed);
    assert_eq!(last.rounds_completed, 3);
    assert!(last.model_path.as_deref().unwrap().ends_with("global_final.json"));

    let rounds = telemetry.rounds.lock();
    assert_eq!(rounds.len(), 3);
    assert_eq!(rounds[0].round_number, 1);
    assert_eq!(rounds[2].round_number, 3);
    assert!(rounds.iter().all(|r| r.aggregation_method == "fedavg_plain"));
    assert!(rounds.iter().all(|r| r.he_scheme.is_none()));
    assert!(rounds.iter().all(|r| r.client_metrics.len() == 2));

    // Clients emitted throttled training progress with durable ids.
    let progress = telemetry.progress.lock();
    assert!(progress
        .iter()
        .any(|p| p.client_id == "client_0" && p.phase == TrainingPhase::Training));
    assert!(progress
        .iter()
        .any(|p| p.phase == TrainingPhase::SendingWeights));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn he_session_reports_scheme_and_stays_finite() {
    let dir = temp_dir("he");
    let telemetry = Arc::new(RecordingTelemetry::default());
    let mut config = session_config(&dir, 2, 3);
    config.use_he = true;

    let ctx = Arc::new(CkksContext::new(HeParams {
        poly_modulus_degree: 64,
        scale_bits: 40,
    }));
    let selection = LayerSelection::from_csv("classifier.weight,classifier.bias");
    let strategy = Box::new(CkksFedAvg::new(ctx, selection));
    let mut session = build_session(config, strategy, 3, telemetry.clone());

    let (_tx, rx) = watch::channel(false);
    let report = session.run(rx).await.unwrap();
    assert_eq!(report.rounds_completed, 2);

    let rounds = telemetry.rounds.lock();
    assert_eq!(rounds.len(), 2);
    for r in rounds.iter() {
        assert_eq!(r.aggregation_method, "fedavg_he_ckks");
        assert_eq!(r.he_scheme.as_deref(), Some("ckks"));
        assert_eq!(r.he_poly_modulus, Some(64));
        assert!(r.client_metrics.iter().all(|m| m.encrypted));
    }
    drop(rounds);

    // The server-side pipeline announces both encrypted phases.
    let progress = telemetry.progress.lock();
    assert!(progress
        .iter()
        .any(|p| p.client_id == "server" && p.phase == TrainingPhase::Encrypting));
    assert!(progress
        .iter()
        .any(|p| p.client_id == "server" && p.phase == TrainingPhase::Aggregating));
    drop(progress);

    // Every checkpointed value survived the encrypt/decrypt path finite.
    let raw = std::fs::read_to_string(dir.join("fl_checkpoints/global_round_2.json")).unwrap();
    let checkpoint: Checkpoint = serde_json::from_str(&raw).unwrap();
    for (_, tensor) in checkpoint.model_state.iter() {
        assert!(tensor.data.iter().all(|v| v.is_finite()));
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn checkpoint_matches_live_global_state() {
    let dir = temp_dir("resume");
    let telemetry = Arc::new(RecordingTelemetry::default());
    let config = session_config(&dir, 2, 2);
    let mut session = build_session(config, Box::new(PlainFedAvg), 2, telemetry);

    let (_tx, rx) = watch::channel(false);
    session.run(rx).await.unwrap();

    // The last round's checkpoint is byte-equivalent to the final global
    // state, so a restart can resume from it.
    let loaded = session.coordinator().checkpoints().load(2).unwrap();
    assert_eq!(loaded.round, 2);
    assert_eq!(loaded.model_state, session.coordinator().global_snapshot());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn stop_signal_ends_session_at_round_boundary() {
    let dir = temp_dir("stop");
    let telemetry = Arc::new(RecordingTelemetry::default());
    let config = session_config(&dir, 50, 2);
    let mut session = build_session(config, Box::new(PlainFedAvg), 2, telemetry.clone());

    let (tx, rx) = watch::channel(true);
    let report = session.run(rx).await.unwrap();
    drop(tx);
    assert_eq!(report.rounds_completed, 0);

    // The session still closes out cleanly: final snapshot plus status.
    assert!(dir.join("global_final.json").exists());
    let statuses = telemetry.statuses.lock();
    assert_eq!(statuses.last().unwrap().status, SessionStatus::Completed);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn under_quorum_session_fails_with_status() {
    let dir = temp_dir("quorum");
    let telemetry = Arc::new(RecordingTelemetry::default());
    let mut config = session_config(&dir, 2, 1);
    config.min_available_clients = 3;
    config.min_fit_clients = 3;
    let mut session = build_session(config, Box::new(PlainFedAvg), 1, telemetry.clone());

    let (_tx, rx) = watch::channel(false);
    let err = session.run(rx).await.unwrap_err();
    assert!(err.to_string().contains("clients available"), "{err}");

    let statuses = telemetry.statuses.lock();
    assert_eq!(statuses.last().unwrap().status, SessionStatus::Failed);
    assert_eq!(statuses.last().unwrap().rounds_completed, 0);
    let _ = std::fs::remove_dir_all(&dir);
}
