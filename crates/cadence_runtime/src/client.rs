//! Device Collaborators
//!
//! The engine never talks to vendor APIs directly. Every actuator, sensor,
//! webhook and configuration store sits behind one of these traits, and the
//! application supplies the implementations.

use std::sync::Arc;

use async_trait::async_trait;

use cadence_types::{
    ContactSensorConfig, DeviceConfig, DeviceKey, HttpMethod, KillswitchConfig, SceneConfig,
};

use crate::error::{DeviceResult, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Readings & Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Resolved values passed to an actuator when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerParams {
    /// Only set for classes that take an intensity
    pub intensity: Option<u32>,
    pub duration_secs: u32,
}

/// State of a contact sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactReading {
    Open,
    Closed,
}

impl ContactReading {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// State of the killswitch guard device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReading {
    On,
    Off,
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Something the scheduler can fire
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn trigger(&self, params: TriggerParams) -> DeviceResult<()>;
}

/// A door or window contact
#[async_trait]
pub trait ContactSensor: Send + Sync {
    async fn read(&self) -> DeviceResult<ContactReading>;
}

/// An on/off device watched by the killswitch
#[async_trait]
pub trait SwitchSensor: Send + Sync {
    async fn read(&self) -> DeviceResult<SwitchReading>;
}

/// Factory for device handles
///
/// Called at the start of the running phase (and lazily when a modifier arms
/// a device). An error leaves that one slot unarmed for the run.
#[async_trait]
pub trait DeviceClients: Send + Sync {
    async fn actuator(&self, device: &DeviceConfig) -> DeviceResult<Arc<dyn Actuator>>;

    async fn contact_sensor(
        &self,
        sensor: &ContactSensorConfig,
    ) -> DeviceResult<Arc<dyn ContactSensor>>;

    async fn switch(&self, killswitch: &KillswitchConfig) -> DeviceResult<Arc<dyn SwitchSensor>>;
}

/// Outbound HTTP call used for lock hooks and the abort webhook
#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn invoke(&self, url: &str, method: HttpMethod, payload: Option<&str>)
    -> DeviceResult<()>;
}

/// Persistent home of the scene configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<SceneConfig, StoreError>;

    async fn save(&self, config: &SceneConfig) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Dry Run
// ─────────────────────────────────────────────────────────────────────────────

/// Actuator used in dry-run scenes: logs the firing and reports success
#[derive(Debug, Clone)]
pub struct DryRunActuator {
    key: DeviceKey,
}

impl DryRunActuator {
    pub fn new(key: DeviceKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Actuator for DryRunActuator {
    async fn trigger(&self, params: TriggerParams) -> DeviceResult<()> {
        tracing::info!(
            device = %self.key,
            intensity = ?params.intensity,
            duration_secs = params.duration_secs,
            "[dry run] trigger"
        );
        Ok(())
    }
}
