//! Cadence Types - Core data model for the scene engine
//!
//! This crate contains the pure data structures shared by the runtime and the
//! application: parameter specs, device and modifier configuration, and the
//! scene status reported to the dashboard.

mod device;
mod param;
mod scene;
mod status;

pub use device::*;
pub use param::*;
pub use scene::*;
pub use status::*;
