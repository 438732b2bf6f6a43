//! Core engine for slake.
//!
//! The pipeline, leaves first: the configuration evaluator flattens
//! conditional configuration for a target, the fingerprint module turns the
//! result into a cache key, the adapter registry picks a build tool, the
//! library build unit drives one (library, target) build against the cache,
//! the graph resolver orders build units topologically, and the universal
//! module fuses several per-target outputs into one bundle. The
//! orchestrator at the top ties it all to a manifest on disk.

pub mod adapters;
pub mod config;
pub mod context;
pub mod fingerprint;
pub mod graph;
pub mod library;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod universal;

pub use config::ConfigError;
pub use context::BuildContext;
pub use graph::GraphError;
pub use library::Library;
pub use orchestrator::Orchestrator;
pub use source::IntegrityError;

/// User agent for source downloads.
pub const USER_AGENT: &str = concat!("slake/", env!("CARGO_PKG_VERSION"));
