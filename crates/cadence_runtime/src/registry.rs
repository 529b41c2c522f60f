//! Device Registry
//!
//! Per-slot runtime state for the active scene: the actuator handle (absent
//! when initialization failed) and the fire counter.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use cadence_types::{DeviceConfig, DeviceKey, SceneConfig};

use crate::client::{Actuator, DeviceClients, DryRunActuator};
use crate::error::DeviceResult;
use crate::notify::{Notifier, SceneEvent};

/// Runtime state of a device slot
#[derive(Clone)]
pub struct DeviceRuntime {
    pub handle: Option<Arc<dyn Actuator>>,
    pub fired: u32,
}

/// Armed devices and their fire counters
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceKey, DeviceRuntime>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every handle and counter
    pub fn clear(&self) {
        self.devices.clear();
    }

    /// Arm every enabled device in `config`
    ///
    /// A device that fails to initialize is logged and stays unarmed; it never
    /// aborts the scene. Returns the number of devices armed.
    pub async fn initialize(
        &self,
        config: &SceneConfig,
        clients: &dyn DeviceClients,
        dry_run: bool,
        notifier: &Notifier,
    ) -> usize {
        self.clear();

        let mut armed = 0;
        for device in config.devices.iter().filter(|d| d.enabled) {
            if self.connect(device, clients, dry_run, notifier).await.is_ok() {
                armed += 1;
            }
        }

        tracing::info!("Armed {} devices", armed);
        armed
    }

    /// Arm a device mid-scene if it has no handle yet
    ///
    /// An existing fire counter is kept; a new entry starts at zero.
    pub async fn arm(
        &self,
        device: &DeviceConfig,
        clients: &dyn DeviceClients,
        dry_run: bool,
        notifier: &Notifier,
    ) -> DeviceResult<()> {
        if self.is_armed(device.key()) {
            return Ok(());
        }
        self.connect(device, clients, dry_run, notifier).await
    }

    async fn connect(
        &self,
        device: &DeviceConfig,
        clients: &dyn DeviceClients,
        dry_run: bool,
        notifier: &Notifier,
    ) -> DeviceResult<()> {
        let key = device.key();

        let result = if dry_run {
            Ok(Arc::new(DryRunActuator::new(key)) as Arc<dyn Actuator>)
        } else {
            clients.actuator(device).await
        };

        match result {
            Ok(handle) => {
                tracing::info!("API: {} initialized (target: {})", key, device.target);
                self.devices
                    .entry(key)
                    .and_modify(|runtime| runtime.handle = Some(Arc::clone(&handle)))
                    .or_insert(DeviceRuntime {
                        handle: Some(handle),
                        fired: 0,
                    });
                notifier.status(format!("{} ready", key));
                notifier.emit(SceneEvent::DeviceArmed { device: key });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("API ERROR: {} initialization failed - {}", key, e);
                self.devices.entry(key).or_insert(DeviceRuntime {
                    handle: None,
                    fired: 0,
                });
                notifier.status(format!("{} failed to initialize", key));
                Err(e)
            }
        }
    }

    pub fn is_armed(&self, key: DeviceKey) -> bool {
        self.devices
            .get(&key)
            .is_some_and(|runtime| runtime.handle.is_some())
    }

    /// Handle and current count of an armed device
    pub fn armed(&self, key: DeviceKey) -> Option<(Arc<dyn Actuator>, u32)> {
        let runtime = self.devices.get(&key)?;
        let handle = runtime.handle.clone()?;
        Some((handle, runtime.fired))
    }

    pub fn fire_count(&self, key: DeviceKey) -> u32 {
        self.devices.get(&key).map(|r| r.fired).unwrap_or(0)
    }

    /// Count a successful firing, returning the new total
    pub fn record_fire(&self, key: DeviceKey) -> u32 {
        let mut runtime = self.devices.entry(key).or_insert(DeviceRuntime {
            handle: None,
            fired: 0,
        });
        runtime.fired += 1;
        runtime.fired
    }

    /// Fire counts of every device that has runtime state
    pub fn fire_counts(&self) -> BTreeMap<DeviceKey, u32> {
        self.devices
            .iter()
            .map(|entry| (*entry.key(), entry.value().fired))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClients;
    use cadence_types::ParameterSpec;

    fn config() -> SceneConfig {
        SceneConfig::new(ParameterSpec::Fixed(60), 0)
            .with_device(DeviceConfig::new(DeviceKey::haptic(1)).with_enabled(true))
            .with_device(DeviceConfig::new(DeviceKey::haptic(2)).with_enabled(true))
            .with_device(DeviceConfig::new(DeviceKey::mechanical(1)))
    }

    #[tokio::test]
    async fn test_initialize_arms_enabled_devices_only() {
        let clients = MockClients::new();
        let notifier = Notifier::new();
        let registry = DeviceRegistry::new();

        let armed = registry.initialize(&config(), &clients, false, &notifier).await;

        assert_eq!(armed, 2);
        assert!(registry.is_armed(DeviceKey::haptic(1)));
        assert!(!registry.is_armed(DeviceKey::mechanical(1)));
    }

    #[tokio::test]
    async fn test_failed_device_stays_unarmed() {
        let clients = MockClients::new();
        clients.fail_connect(DeviceKey::haptic(2));
        let notifier = Notifier::new();
        let registry = DeviceRegistry::new();

        let armed = registry.initialize(&config(), &clients, false, &notifier).await;

        assert_eq!(armed, 1);
        assert!(!registry.is_armed(DeviceKey::haptic(2)));
        assert!(
            notifier
                .status_lines()
                .iter()
                .any(|l| l.ends_with("Haptic Module 2 failed to initialize"))
        );
    }

    #[tokio::test]
    async fn test_arm_keeps_existing_counter() {
        let clients = MockClients::new();
        let notifier = Notifier::new();
        let registry = DeviceRegistry::new();
        let device = DeviceConfig::new(DeviceKey::custom(1));

        tokio_test::assert_ok!(registry.arm(&device, &clients, false, &notifier).await);
        assert_eq!(registry.record_fire(device.key()), 1);

        tokio_test::assert_ok!(registry.arm(&device, &clients, false, &notifier).await);
        assert_eq!(registry.fire_count(device.key()), 1);
        assert_eq!(clients.connect_count(device.key()), 1);
    }

    #[tokio::test]
    async fn test_dry_run_skips_clients() {
        let clients = MockClients::new();
        let notifier = Notifier::new();
        let registry = DeviceRegistry::new();

        registry.initialize(&config(), &clients, true, &notifier).await;

        assert!(registry.is_armed(DeviceKey::haptic(1)));
        assert_eq!(clients.connect_count(DeviceKey::haptic(1)), 0);
    }
}
