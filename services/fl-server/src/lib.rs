//! Federated round orchestration and secure aggregation.

pub mod aggregator;
pub mod checkpoint;
pub mod clients;
pub mod coordinator;
pub mod session;
