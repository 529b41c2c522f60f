//! Cadence - timed scene runner
//!
//! Wires the scene engine to its real collaborators:
//! - `config`: the `scene.toml` store
//! - `http`: the HTTP device bridge and webhook caller

// Re-export core crates
pub use cadence_runtime;
pub use cadence_types;

// Configuration file
pub mod config;

// HTTP device bridge & webhooks
pub mod http;
