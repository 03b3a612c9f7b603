//! adaptest-sync — attempt persistence, access control and remote sync.
//!
//! Wraps `adaptest-core` sessions in an [`attempt::AttemptRunner`] that saves
//! every mutation locally and queues snapshots for a background
//! [`worker::SyncWorker`] to push to a remote store.

pub mod attempt;
pub mod config;
pub mod engine;
pub mod error;
pub mod mock;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod store;
pub mod worker;

pub use config::{create_remote, load_config, AdaptestConfig, RemoteConfig, SyncConfig};
pub use engine::{AccessGate, AllowAll, AttemptEngine, Catalog, StaticAccess};
pub use error::{AttemptError, StoreError, SyncError};
