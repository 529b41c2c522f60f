//! Scene Configuration
//!
//! The complete description of a scene as stored on disk: timing, device
//! slots, modifier rules, contact sensors, the killswitch guard and the lock
//! hooks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceClass, DeviceConfig, DeviceKey, EnabledSnapshot};
use crate::param::{ParameterSpec, lenient};

/// Number of slots created per device class in the default configuration
pub const SLOTS_PER_CLASS: u8 = 4;

/// Number of modifier rule slots
pub const MODIFIER_SLOTS: u8 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Scene Config
// ─────────────────────────────────────────────────────────────────────────────

/// Scene timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneTiming {
    /// Total running time in seconds
    #[serde(
        default = "default_scene_duration",
        deserialize_with = "lenient::scene_duration"
    )]
    pub duration: ParameterSpec,

    /// Wait before the scene starts running, in seconds
    #[serde(default)]
    pub initial_delay_secs: u64,
}

fn default_scene_duration() -> ParameterSpec {
    ParameterSpec::SCENE_DURATION
}

impl Default for SceneTiming {
    fn default() -> Self {
        Self {
            duration: ParameterSpec::SCENE_DURATION,
            initial_delay_secs: 0,
        }
    }
}

/// Full scene configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub scene: SceneTiming,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killswitch: Option<KillswitchConfig>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub sensors: Vec<ContactSensorConfig>,

    #[serde(default)]
    pub modifiers: Vec<ModifierConfig>,
}

impl Default for SceneConfig {
    /// Every slot present and disabled, matching a freshly created settings file
    fn default() -> Self {
        let devices = DeviceClass::ALL
            .iter()
            .flat_map(|class| {
                (1..=SLOTS_PER_CLASS).map(|slot| DeviceConfig::new(DeviceKey::new(*class, slot)))
            })
            .collect();

        Self {
            scene: SceneTiming::default(),
            lock: LockConfig::default(),
            killswitch: None,
            devices,
            sensors: Vec::new(),
            modifiers: Vec::new(),
        }
    }
}

impl SceneConfig {
    /// An empty configuration with the given timing
    pub fn new(duration: ParameterSpec, initial_delay_secs: u64) -> Self {
        Self {
            scene: SceneTiming {
                duration,
                initial_delay_secs,
            },
            lock: LockConfig::default(),
            killswitch: None,
            devices: Vec::new(),
            sensors: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    /// Add or replace a device slot
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        let key = device.key();
        match self.devices.iter_mut().find(|d| d.key() == key) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
        self
    }

    pub fn with_sensor(mut self, sensor: ContactSensorConfig) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn with_modifier(mut self, modifier: ModifierConfig) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_killswitch(mut self, killswitch: KillswitchConfig) -> Self {
        self.killswitch = Some(killswitch);
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn device(&self, key: DeviceKey) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.key() == key)
    }

    pub fn device_mut(&mut self, key: DeviceKey) -> Option<&mut DeviceConfig> {
        self.devices.iter_mut().find(|d| d.key() == key)
    }

    pub fn is_enabled(&self, key: DeviceKey) -> bool {
        self.device(key).is_some_and(|d| d.enabled)
    }

    /// Enabled flag of every device, for restoring after the scene
    pub fn enabled_snapshot(&self) -> EnabledSnapshot {
        self.devices.iter().map(|d| (d.key(), d.enabled)).collect()
    }

    /// Put enabled flags back to a previously captured snapshot
    ///
    /// Devices absent from the snapshot are left untouched. Returns whether
    /// any flag changed.
    pub fn restore_enabled(&mut self, snapshot: &EnabledSnapshot) -> bool {
        let mut changed = false;
        for device in &mut self.devices {
            if let Some(&enabled) = snapshot.get(&device.key()) {
                if device.enabled != enabled {
                    device.enabled = enabled;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Enabled modifiers bound to a contact sensor slot
    pub fn modifiers_for_sensor(&self, sensor: u8) -> impl Iterator<Item = &ModifierConfig> {
        self.modifiers
            .iter()
            .filter(move |m| m.enabled && m.sensor == sensor)
    }

    pub fn modifier(&self, id: u8) -> Option<&ModifierConfig> {
        self.modifiers.iter().find(|m| m.id == id)
    }

    /// Check the configuration for problems
    ///
    /// None of these are fatal: the engine logs them and runs with what it has.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        let mut keys = HashSet::new();
        for device in &self.devices {
            if device.slot == 0 {
                issues.push(ConfigError::InvalidSlot(device.key()));
            }
            if !keys.insert(device.key()) {
                issues.push(ConfigError::DuplicateDevice(device.key()));
            }
        }

        let sensors: HashSet<u8> = self.sensors.iter().map(|s| s.slot).collect();
        if sensors.len() != self.sensors.len() {
            issues.push(ConfigError::DuplicateSensor);
        }

        let mut ids = HashSet::new();
        for modifier in &self.modifiers {
            if modifier.id == 0 || modifier.id > MODIFIER_SLOTS {
                issues.push(ConfigError::ModifierOutOfRange(modifier.id));
            }
            if !ids.insert(modifier.id) {
                issues.push(ConfigError::DuplicateModifier(modifier.id));
            }
            if !sensors.contains(&modifier.sensor) {
                issues.push(ConfigError::UnknownSensor {
                    modifier: modifier.id,
                    sensor: modifier.sensor,
                });
            }
            if let Some(key) = modifier.action.arm_target() {
                if self.device(key).is_none() {
                    issues.push(ConfigError::UnknownDevice {
                        modifier: modifier.id,
                        device: key,
                    });
                }
            }
        }

        issues
    }
}

/// Problems found by [`SceneConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} has an invalid slot number")]
    InvalidSlot(DeviceKey),

    #[error("{0} is configured more than once")]
    DuplicateDevice(DeviceKey),

    #[error("a contact sensor slot is configured more than once")]
    DuplicateSensor,

    #[error("modifier {0} is outside the available rule slots")]
    ModifierOutOfRange(u8),

    #[error("modifier {0} is configured more than once")]
    DuplicateModifier(u8),

    #[error("modifier {modifier} is bound to unknown sensor {sensor}")]
    UnknownSensor { modifier: u8, sensor: u8 },

    #[error("modifier {modifier} arms unconfigured {device}")]
    UnknownDevice { modifier: u8, device: DeviceKey },
}

// ─────────────────────────────────────────────────────────────────────────────
// Modifiers
// ─────────────────────────────────────────────────────────────────────────────

/// A one-shot rule fired when its sensor opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierConfig {
    /// Rule slot, 1-based
    pub id: u8,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Contact sensor slot that triggers this rule
    pub sensor: u8,

    pub action: ModifierAction,
}

fn default_true() -> bool {
    true
}

impl ModifierConfig {
    pub fn new(id: u8, sensor: u8, action: ModifierAction) -> Self {
        Self {
            id,
            enabled: true,
            sensor,
            action,
        }
    }
}

/// What a modifier does to the running scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModifierAction {
    /// Push the scene deadline back
    ExtendDuration {
        #[serde(
            default = "default_extend_minutes",
            deserialize_with = "lenient::extend_minutes"
        )]
        minutes: ParameterSpec,
    },
    ArmHaptic { slot: u8 },
    ArmMechanical { slot: u8 },
    ArmCustom { slot: u8 },
}

fn default_extend_minutes() -> ParameterSpec {
    ParameterSpec::EXTEND_MINUTES
}

impl ModifierAction {
    /// Device armed by this action, if it is an arm action
    pub fn arm_target(&self) -> Option<DeviceKey> {
        match *self {
            Self::ExtendDuration { .. } => None,
            Self::ArmHaptic { slot } => Some(DeviceKey::haptic(slot)),
            Self::ArmMechanical { slot } => Some(DeviceKey::mechanical(slot)),
            Self::ArmCustom { slot } => Some(DeviceKey::custom(slot)),
        }
    }

    /// Arm action for an arbitrary device key
    pub fn arm(key: DeviceKey) -> Self {
        match key.class {
            DeviceClass::Haptic => Self::ArmHaptic { slot: key.slot },
            DeviceClass::Mechanical => Self::ArmMechanical { slot: key.slot },
            DeviceClass::CustomHttp => Self::ArmCustom { slot: key.slot },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensors, Killswitch, Lock
// ─────────────────────────────────────────────────────────────────────────────

/// A door/window contact sensor that can trigger modifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSensorConfig {
    pub slot: u8,

    #[serde(default)]
    pub name: String,

    /// Vendor device reference
    pub target: String,
}

impl ContactSensorConfig {
    pub fn new(slot: u8, target: impl Into<String>) -> Self {
        Self {
            slot,
            name: String::new(),
            target: target.into(),
        }
    }

    /// Display name, falling back to the slot number
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Sensor {}", self.slot)
        } else {
            self.name.clone()
        }
    }
}

/// Guard device whose "off" state aborts the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillswitchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Vendor device reference
    pub target: String,

    /// Treat a failed status read as "off"
    #[serde(default)]
    pub unreachable_is_off: bool,

    /// Called once when the killswitch aborts a scene
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_webhook: Option<String>,
}

impl KillswitchConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            enabled: true,
            target: target.into(),
            unreachable_is_off: false,
            abort_webhook: None,
        }
    }
}

/// Webhooks called when the scene starts and stops running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engage_webhook: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disengage_webhook: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_all_slots_disabled() {
        let config = SceneConfig::default();
        assert_eq!(config.devices.len(), 3 * SLOTS_PER_CLASS as usize);
        assert!(config.devices.iter().all(|d| !d.enabled));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut config = SceneConfig::default();
        let snapshot = config.enabled_snapshot();

        config.device_mut(DeviceKey::haptic(2)).unwrap().enabled = true;
        assert!(config.is_enabled(DeviceKey::haptic(2)));

        assert!(config.restore_enabled(&snapshot));
        assert!(!config.is_enabled(DeviceKey::haptic(2)));
        assert!(!config.restore_enabled(&snapshot));
    }

    #[test]
    fn test_modifiers_for_sensor_skips_disabled() {
        let mut disabled = ModifierConfig::new(2, 1, ModifierAction::arm(DeviceKey::haptic(1)));
        disabled.enabled = false;

        let config = SceneConfig::default()
            .with_sensor(ContactSensorConfig::new(1, "door"))
            .with_modifier(ModifierConfig::new(
                1,
                1,
                ModifierAction::ExtendDuration {
                    minutes: ParameterSpec::Fixed(2),
                },
            ))
            .with_modifier(disabled)
            .with_modifier(ModifierConfig::new(3, 2, ModifierAction::arm(DeviceKey::custom(1))));

        let ids: Vec<u8> = config.modifiers_for_sensor(1).map(|m| m.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = SceneConfig::new(ParameterSpec::Fixed(60), 0)
            .with_device(DeviceConfig::new(DeviceKey::haptic(1)))
            .with_sensor(ContactSensorConfig::new(1, "door"))
            .with_modifier(ModifierConfig::new(5, 1, ModifierAction::arm(DeviceKey::haptic(1))))
            .with_modifier(ModifierConfig::new(1, 9, ModifierAction::arm(DeviceKey::mechanical(3))));

        let issues = config.validate();
        assert!(issues.contains(&ConfigError::ModifierOutOfRange(5)));
        assert!(issues.contains(&ConfigError::UnknownSensor { modifier: 1, sensor: 9 }));
        assert!(issues.contains(&ConfigError::UnknownDevice {
            modifier: 1,
            device: DeviceKey::mechanical(3),
        }));
    }

    #[test]
    fn test_parse_full_toml() {
        let config: SceneConfig = toml::from_str(
            r#"
            [scene]
            duration = "60-120"
            initial_delay_secs = 30

            [lock]
            engage_webhook = "http://lock/engage"

            [killswitch]
            target = "plug-1"

            [[devices]]
            class = "mechanical"
            slot = 2
            enabled = true
            interval = 8
            repeat_limit = 3

            [[sensors]]
            slot = 1
            target = "door-1"

            [[modifiers]]
            id = 1
            sensor = 1
            action = { type = "extend-duration", minutes = "1-3" }

            [[modifiers]]
            id = 2
            sensor = 1
            action = { type = "arm-haptic", slot = 4 }
            "#,
        )
        .unwrap();

        assert_eq!(config.scene.duration, ParameterSpec::Random { min: 60, max: 120 });
        assert_eq!(config.scene.initial_delay_secs, 30);
        assert_eq!(config.lock.engage_webhook.as_deref(), Some("http://lock/engage"));
        let killswitch = config.killswitch.as_ref().unwrap();
        assert!(killswitch.enabled);
        assert!(!killswitch.unreachable_is_off);

        let device = config.device(DeviceKey::mechanical(2)).unwrap();
        assert_eq!(device.interval, ParameterSpec::Fixed(8));
        assert_eq!(device.repeat_limit, Some(3));

        assert_eq!(
            config.modifier(1).unwrap().action,
            ModifierAction::ExtendDuration {
                minutes: ParameterSpec::Random { min: 1, max: 3 }
            }
        );
        assert_eq!(
            config.modifier(2).unwrap().action.arm_target(),
            Some(DeviceKey::haptic(4))
        );
    }
}
