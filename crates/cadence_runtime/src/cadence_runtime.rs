//! Cadence Runtime - Scene execution engine
//!
//! Drives a timed scene: an initial delay, then a one-second tick loop that
//! fires independently scheduled devices until the deadline passes, the user
//! stops it, or the killswitch guard reports off. A concurrent contact-sensor
//! monitor turns sensor openings into one-shot modifiers that extend the
//! deadline or arm extra devices mid-scene.
//!
//! # Components
//!
//! - [`SceneEngine`]: start/stop/status and the scene state machine
//! - [`DeviceRegistry`]: armed actuator handles and fire counters
//! - [`DeviceScheduler`]: per-device interval and magnitude resolution
//! - [`ModifierDispatcher`]: one-shot modifier actions
//! - [`ContactSensorMonitor`]: closed→open edge detection
//! - [`KillswitchMonitor`]: guard device checks
//! - [`Notifier`]: status log, popups and the event stream

mod client;
mod context;
mod dispatcher;
mod engine;
mod error;
mod killswitch;
mod notify;
mod registry;
mod scheduler;
mod sensors;
pub mod testing;

pub use cadence_types;

pub use client::*;
pub use context::*;
pub use dispatcher::*;
pub use engine::*;
pub use error::*;
pub use killswitch::*;
pub use notify::*;
pub use registry::*;
pub use scheduler::*;
pub use sensors::*;
