//! Filesystem surveillance engine: watches configured root directories, waits for each new or
//! changed file to go quiescent, then runs a configured shell action against it, with a durable
//! shadow tree under `.seen/` recording progress so a restart can pick up where the last run left
//! off.

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod hash;
pub mod index;
pub mod ingestor;
pub mod node;
pub mod rescan;
pub mod scheduler;
pub mod shadow;
pub mod tree;

pub use action::{ActionOutcome, Executor, ProcessExecutor};
pub use config::{Config, WatchGroup};
pub use engine::Engine;
pub use error::{Result, SurveilError};
pub use node::{Cookie, NodeId, NodeKind, ReasonCode, WatchId};
pub use shadow::{ShadowDisposition, ShadowTree};
pub use tree::WatchedTree;
