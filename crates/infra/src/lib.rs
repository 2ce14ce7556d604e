//! Infrastructure layer: configuration, database, task store, provider
//! adapter, worker pool, retention sweeper, shutdown coordination.

pub mod config;
pub mod db;
pub mod provider;
pub mod shutdown;
pub mod store;
pub mod sweeper;
pub mod worker;

pub use config::{Config, ConfigError};
pub use shutdown::ShutdownSignal;
pub use store::{HistoryFilter, HistoryPage, QueueStats, StoreError, TaskStore};
pub use sweeper::{RetentionSweeper, SweeperConfig};
pub use worker::{WorkerConfig, WorkerPool};
