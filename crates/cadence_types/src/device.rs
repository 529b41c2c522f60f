//! Device configuration types

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::param::{ParameterSpec, lenient};

/// Kind of actuator occupying a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    /// Haptic module driven with an intensity and a duration
    Haptic,
    /// Mechanical button pusher
    Mechanical,
    /// Arbitrary accessory triggered by an HTTP request
    CustomHttp,
}

impl DeviceClass {
    /// All classes in scheduling order
    pub const ALL: [DeviceClass; 3] = [Self::Haptic, Self::Mechanical, Self::CustomHttp];

    /// Short identifier used in paths and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Haptic => "haptic",
            Self::Mechanical => "mechanical",
            Self::CustomHttp => "custom-http",
        }
    }

    /// Human-facing label shown in status messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Haptic => "Haptic Module",
            Self::Mechanical => "Actuator",
            Self::CustomHttp => "Accessory",
        }
    }

    /// Whether this class takes an intensity when triggered
    pub fn uses_intensity(&self) -> bool {
        matches!(self, Self::Haptic)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a device slot: class plus 1-based slot number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub class: DeviceClass,
    pub slot: u8,
}

impl DeviceKey {
    pub fn new(class: DeviceClass, slot: u8) -> Self {
        Self { class, slot }
    }

    pub fn haptic(slot: u8) -> Self {
        Self::new(DeviceClass::Haptic, slot)
    }

    pub fn mechanical(slot: u8) -> Self {
        Self::new(DeviceClass::Mechanical, slot)
    }

    pub fn custom(slot: u8) -> Self {
        Self::new(DeviceClass::CustomHttp, slot)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class.label(), self.slot)
    }
}

/// HTTP method used by custom accessories and webhooks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

/// Configuration for a single device slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub class: DeviceClass,
    pub slot: u8,

    #[serde(default)]
    pub enabled: bool,

    /// Vendor device reference, share code, or accessory URL
    #[serde(default)]
    pub target: String,

    /// Seconds between firings
    #[serde(default = "default_interval", deserialize_with = "lenient::interval")]
    pub interval: ParameterSpec,

    /// Only meaningful for haptic modules
    #[serde(default = "default_intensity", deserialize_with = "lenient::intensity")]
    pub intensity: ParameterSpec,

    /// Activation length in seconds
    #[serde(default = "default_duration", deserialize_with = "lenient::duration")]
    pub duration: ParameterSpec,

    /// Upper bound on firings per scene (absent = unlimited)
    #[serde(
        default,
        deserialize_with = "lenient::repeat_limit",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_limit: Option<u32>,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

fn default_interval() -> ParameterSpec {
    ParameterSpec::INTERVAL
}

fn default_intensity() -> ParameterSpec {
    ParameterSpec::INTENSITY
}

fn default_duration() -> ParameterSpec {
    ParameterSpec::DURATION
}

impl DeviceConfig {
    /// Create a disabled device with default parameters
    pub fn new(key: DeviceKey) -> Self {
        Self {
            class: key.class,
            slot: key.slot,
            enabled: false,
            target: String::new(),
            interval: ParameterSpec::INTERVAL,
            intensity: ParameterSpec::INTENSITY,
            duration: ParameterSpec::DURATION,
            repeat_limit: None,
            method: HttpMethod::Get,
            payload: None,
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.class, self.slot)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_interval(mut self, interval: ParameterSpec) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_intensity(mut self, intensity: ParameterSpec) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_duration(mut self, duration: ParameterSpec) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_repeat_limit(mut self, limit: u32) -> Self {
        self.repeat_limit = Some(limit);
        self
    }

    /// Whether `count` firings have exhausted the repeat limit
    pub fn limit_reached(&self, count: u32) -> bool {
        self.repeat_limit.is_some_and(|limit| count >= limit)
    }
}

/// Enabled flag per device, captured at scene start
pub type EnabledSnapshot = HashMap<DeviceKey, bool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_key_display() {
        assert_eq!(DeviceKey::haptic(2).to_string(), "Haptic Module 2");
        assert_eq!(DeviceKey::custom(1).to_string(), "Accessory 1");
    }

    #[test]
    fn test_limit_reached() {
        let device = DeviceConfig::new(DeviceKey::mechanical(1));
        assert!(!device.limit_reached(1_000));

        let device = device.with_repeat_limit(3);
        assert!(!device.limit_reached(2));
        assert!(device.limit_reached(3));
    }

    #[test]
    fn test_deserialize_defaults_and_lenient_fields() {
        let device: DeviceConfig = toml::from_str(
            r#"
            class = "haptic"
            slot = 1
            enabled = true
            interval = "2-10"
            intensity = "loud"
            repeat_limit = ""
            "#,
        )
        .unwrap();

        assert_eq!(device.key(), DeviceKey::haptic(1));
        assert!(device.enabled);
        assert_eq!(device.interval, ParameterSpec::Random { min: 2, max: 10 });
        assert_eq!(device.intensity, ParameterSpec::INTENSITY);
        assert_eq!(device.duration, ParameterSpec::DURATION);
        assert_eq!(device.repeat_limit, None);
        assert_eq!(device.method, HttpMethod::Get);
    }
}
