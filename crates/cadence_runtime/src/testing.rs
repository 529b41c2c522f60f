//! Test doubles for the engine's collaborators
//!
//! In-memory actuators, scripted sensors and a recording webhook, usable from
//! unit tests, integration tests and downstream crates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cadence_types::{
    ContactSensorConfig, DeviceConfig, DeviceKey, HttpMethod, KillswitchConfig, SceneConfig,
};

use crate::client::{
    Actuator, ConfigStore, ContactReading, ContactSensor, DeviceClients, SwitchReading,
    SwitchSensor, TriggerParams, WebhookCaller,
};
use crate::context::SceneContext;
use crate::error::{DeviceError, DeviceResult, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Actuator
// ─────────────────────────────────────────────────────────────────────────────

/// Actuator that records every successful trigger
#[derive(Default)]
pub struct MockActuator {
    triggers: Mutex<Vec<TriggerParams>>,
    attempts: AtomicU32,
    fail_next: AtomicU32,
    fail_always: AtomicBool,
}

impl MockActuator {
    /// Parameters of every successful trigger, in order
    pub fn triggers(&self) -> Vec<TriggerParams> {
        self.triggers.lock().clone()
    }

    /// Trigger calls including failed ones
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `n` trigger calls
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn trigger(&self, params: TriggerParams) -> DeviceResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("mock actuator offline".into()));
        }
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(DeviceError::Timeout);
        }
        self.triggers.lock().push(params);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensors
// ─────────────────────────────────────────────────────────────────────────────

/// Contact sensor whose state is set by the test
#[derive(Default)]
pub struct ScriptedContactSensor {
    open: AtomicBool,
    error: AtomicBool,
    reads: AtomicU32,
}

impl ScriptedContactSensor {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make reads fail until cleared
    pub fn set_error(&self, error: bool) {
        self.error.store(error, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactSensor for ScriptedContactSensor {
    async fn read(&self) -> DeviceResult<ContactReading> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.error.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("mock sensor offline".into()));
        }
        Ok(if self.open.load(Ordering::SeqCst) {
            ContactReading::Open
        } else {
            ContactReading::Closed
        })
    }
}

/// Guard switch whose state is set by the test; starts on
pub struct ScriptedSwitch {
    state: Mutex<SwitchReading>,
    error: AtomicBool,
}

impl Default for ScriptedSwitch {
    fn default() -> Self {
        Self {
            state: Mutex::new(SwitchReading::On),
            error: AtomicBool::new(false),
        }
    }
}

impl ScriptedSwitch {
    pub fn set(&self, reading: SwitchReading) {
        *self.state.lock() = reading;
    }

    pub fn set_error(&self, error: bool) {
        self.error.store(error, Ordering::SeqCst);
    }
}

#[async_trait]
impl SwitchSensor for ScriptedSwitch {
    async fn read(&self) -> DeviceResult<SwitchReading> {
        if self.error.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("mock switch offline".into()));
        }
        Ok(*self.state.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Clients
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockClientsInner {
    actuators: Mutex<HashMap<DeviceKey, Arc<MockActuator>>>,
    sensors: Mutex<HashMap<u8, Arc<ScriptedContactSensor>>>,
    switch: Arc<ScriptedSwitch>,
    failing: Mutex<HashSet<DeviceKey>>,
    connects: Mutex<HashMap<DeviceKey, u32>>,
}

/// Device factory handing out mock devices, shared between clones
#[derive(Clone, Default)]
pub struct MockClients {
    inner: Arc<MockClientsInner>,
}

impl MockClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mock actuator behind a device slot, created on first use
    pub fn device(&self, key: DeviceKey) -> Arc<MockActuator> {
        Arc::clone(self.inner.actuators.lock().entry(key).or_default())
    }

    /// The scripted sensor behind a sensor slot; starts closed
    pub fn sensor(&self, slot: u8) -> Arc<ScriptedContactSensor> {
        Arc::clone(self.inner.sensors.lock().entry(slot).or_default())
    }

    /// The scripted killswitch guard device
    pub fn killswitch(&self) -> Arc<ScriptedSwitch> {
        Arc::clone(&self.inner.switch)
    }

    /// Make handle creation fail for a device
    pub fn fail_connect(&self, key: DeviceKey) {
        self.inner.failing.lock().insert(key);
    }

    /// How many handles were created for a device
    pub fn connect_count(&self, key: DeviceKey) -> u32 {
        self.inner.connects.lock().get(&key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeviceClients for MockClients {
    async fn actuator(&self, device: &DeviceConfig) -> DeviceResult<Arc<dyn Actuator>> {
        let key = device.key();
        if self.inner.failing.lock().contains(&key) {
            return Err(DeviceError::Rejected(format!("{} refused connection", key)));
        }
        *self.inner.connects.lock().entry(key).or_default() += 1;
        Ok(self.device(key))
    }

    async fn contact_sensor(
        &self,
        sensor: &ContactSensorConfig,
    ) -> DeviceResult<Arc<dyn ContactSensor>> {
        Ok(self.sensor(sensor.slot))
    }

    async fn switch(&self, _killswitch: &KillswitchConfig) -> DeviceResult<Arc<dyn SwitchSensor>> {
        Ok(self.killswitch())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook & Store
// ─────────────────────────────────────────────────────────────────────────────

/// Webhook caller that records URLs instead of calling them
#[derive(Default)]
pub struct RecordingWebhook {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WebhookCaller for RecordingWebhook {
    async fn invoke(
        &self,
        url: &str,
        _method: HttpMethod,
        _payload: Option<&str>,
    ) -> DeviceResult<()> {
        self.calls.lock().push(url.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeviceError::Rejected("HTTP 500".into()));
        }
        Ok(())
    }
}

/// Configuration store kept in memory
#[derive(Default)]
pub struct MemoryConfigStore {
    config: Mutex<SceneConfig>,
    saves: AtomicUsize,
    fail_load: AtomicBool,
    save_delay: Mutex<Option<Duration>>,
}

impl MemoryConfigStore {
    pub fn new(config: SceneConfig) -> Self {
        Self {
            config: Mutex::new(config),
            ..Default::default()
        }
    }

    /// The configuration as last saved
    pub fn saved(&self) -> SceneConfig {
        self.config.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Hold the next save for `delay` before it is written
    pub fn delay_next_save(&self, delay: Duration) {
        *self.save_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<SceneConfig, StoreError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::Parse("mock store unreadable".into()));
        }
        Ok(self.config.lock().clone())
    }

    async fn save(&self, config: &SceneConfig) -> Result<(), StoreError> {
        let delay = self.save_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self.config.lock() = config.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scene context backed by mocks and an in-memory store
pub fn test_context(clients: MockClients) -> SceneContext {
    SceneContext::new(
        Arc::new(MemoryConfigStore::default()),
        Arc::new(clients),
        Arc::new(RecordingWebhook::new()),
    )
}
