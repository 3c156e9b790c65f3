//! Participant pool and the client transport seam.
//!
//! `ClientProxy` is the assumed connection layer: it delivers a fit
//! instruction and returns the client's result within the round. The pool
//! tracks registered clients and samples round participants; durable
//! identity comes from registration, never from a transport handle.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;

use fedids_core::{FitInstruction, FitResult, FlError};
use fl_trainer::LocalTrainer;

#[async_trait]
pub trait ClientProxy: Send + Sync {
    /// Durable registered identity.
    fn client_id(&self) -> &str;

    async fn fit(&self, instruction: FitInstruction) -> Result<FitResult>;
}

impl std::fmt::Debug for dyn ClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProxy")
            .field("client_id", &self.client_id())
            .finish()
    }
}

/// Registered clients available for sampling.
#[derive(Default)]
pub struct ClientPool {
    clients: RwLock<Vec<Arc<dyn ClientProxy>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: Arc<dyn ClientProxy>) {
        self.clients.write().push(client);
    }

    pub fn available(&self) -> usize {
        self.clients.read().len()
    }

    /// Uniformly samples `sample_size` participants without replacement.
    /// Fails with `ClientUnavailable` when fewer than `min_available`
    /// clients are connected; the round must not start under quorum.
    pub fn sample(
        &self,
        sample_size: usize,
        min_available: usize,
    ) -> Result<Vec<Arc<dyn ClientProxy>>, FlError> {
        let clients = self.clients.read();
        if clients.len() < min_available {
            return Err(FlError::ClientUnavailable {
                available: clients.len(),
                required: min_available,
            });
        }
        let take = sample_size.min(clients.len());
        Ok(clients
            .choose_multiple(&mut rand::thread_rng(), take)
            .cloned()
            .collect())
    }
}

/// Runs a `LocalTrainer` in-process, standing in for a remote client in the
/// embedded simulation mode and in tests. Training is CPU-bound, so it runs
/// on the blocking pool.
pub struct InProcessClient {
    trainer: Arc<LocalTrainer>,
}

impl InProcessClient {
    pub fn new(trainer: LocalTrainer) -> Self {
        Self {
            trainer: Arc::new(trainer),
        }
    }
}

#[async_trait]
impl ClientProxy for InProcessClient {
    fn client_id(&self) -> &str {
        self.trainer.client_id()
    }

    async fn fit(&self, instruction: FitInstruction) -> Result<FitResult> {
        let trainer = self.trainer.clone();
        tokio::task::spawn_blocking(move || trainer.fit(&instruction)).await?
    }
}
