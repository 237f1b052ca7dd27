//! membersync core library.
//!
//! Reconciles a desired membership list against a group directory:
//! configuration, the directory transport, the snapshot model, the diff,
//! operation planning, bounded-concurrency execution and the run engine.

pub mod config;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod membership_file;
pub mod models;
pub mod planner;
pub mod reconciler;
pub mod roles;
pub mod snapshot;

// Re-exports for convenience.
pub use config::AppConfig;
pub use directory::{DirectoryClient, DirectoryTransport};
pub use engine::{EngineOptions, ReconcileEngine, RunReport, RunState};
pub use membership_file::MembershipFile;
pub use roles::RoleResolver;
pub use snapshot::GroupDirectorySnapshot;
