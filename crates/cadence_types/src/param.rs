//! Parameter Specs
//!
//! A configured value that is either fixed or drawn from an inclusive range at
//! the moment it is used.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Spec
// ─────────────────────────────────────────────────────────────────────────────

/// A fixed value or an inclusive random range, resolved at use time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSpec {
    /// Always resolves to the same value
    Fixed(u32),
    /// Resolves to a uniform draw from `min..=max`
    Random { min: u32, max: u32 },
}

impl ParameterSpec {
    /// Default firing interval in seconds
    pub const INTERVAL: Self = Self::Fixed(5);
    /// Default haptic intensity
    pub const INTENSITY: Self = Self::Fixed(25);
    /// Default activation duration in seconds
    pub const DURATION: Self = Self::Fixed(1);
    /// Default scene length in seconds
    pub const SCENE_DURATION: Self = Self::Fixed(600);
    /// Default extension applied by a duration modifier, in minutes
    pub const EXTEND_MINUTES: Self = Self::Fixed(5);

    /// Create a random range, ordering the bounds so that `min <= max`
    pub fn random(a: u32, b: u32) -> Self {
        Self::Random {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Lowest and highest value this spec can resolve to
    pub fn bounds(&self) -> (u32, u32) {
        match *self {
            Self::Fixed(v) => (v, v),
            Self::Random { min, max } => (min.min(max), min.max(max)),
        }
    }

    /// Resolve to a concrete value using the thread-local RNG
    pub fn resolve(&self) -> u32 {
        self.resolve_with(&mut rand::thread_rng())
    }

    /// Resolve to a concrete value using the given RNG
    pub fn resolve_with<R: Rng>(&self, rng: &mut R) -> u32 {
        match *self {
            Self::Fixed(v) => v,
            Self::Random { .. } => {
                let (min, max) = self.bounds();
                rng.gen_range(min..=max)
            }
        }
    }

    /// Parse the dashboard text form, falling back when the text is unusable
    pub fn parse_or(text: &str, fallback: ParameterSpec) -> Self {
        match text.parse() {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!("Invalid parameter '{}' ({}), using {}", text, e, fallback);
                fallback
            }
        }
    }
}

impl fmt::Display for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "{}", v),
            Self::Random { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

/// Errors from parsing the text form of a parameter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseParameterError {
    #[error("empty parameter")]
    Empty,

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),
}

fn parse_number(text: &str) -> Result<u32, ParseParameterError> {
    let text = text.trim();
    text.parse()
        .map_err(|_| ParseParameterError::InvalidNumber(text.to_string()))
}

impl FromStr for ParameterSpec {
    type Err = ParseParameterError;

    /// Accepts `"5"` (fixed) or `"2-10"` (random range)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseParameterError::Empty);
        }

        match s.split_once('-') {
            Some((low, high)) => Ok(Self::random(parse_number(low)?, parse_number(high)?)),
            None => Ok(Self::Fixed(parse_number(s)?)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serde
// ─────────────────────────────────────────────────────────────────────────────

impl Serialize for ParameterSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(v) => serializer.serialize_u32(*v),
            Self::Random { .. } => serializer.collect_str(self),
        }
    }
}

/// Every shape a parameter may take in a config file
#[derive(Deserialize)]
#[serde(untagged)]
enum RawParameter {
    Number(i64),
    Text(String),
    Fixed { fixed: i64 },
    Range { min: i64, max: i64 },
    Other(IgnoredAny),
}

fn to_u32(v: i64) -> Result<u32, ParseParameterError> {
    u32::try_from(v).map_err(|_| ParseParameterError::InvalidNumber(v.to_string()))
}

impl RawParameter {
    fn into_spec(self) -> Result<ParameterSpec, ParseParameterError> {
        match self {
            RawParameter::Number(v) | RawParameter::Fixed { fixed: v } => {
                Ok(ParameterSpec::Fixed(to_u32(v)?))
            }
            RawParameter::Text(text) => text.parse(),
            RawParameter::Range { min, max } => Ok(ParameterSpec::random(to_u32(min)?, to_u32(max)?)),
            RawParameter::Other(_) => Err(ParseParameterError::InvalidNumber(
                "unsupported value".to_string(),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ParameterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawParameter::deserialize(deserializer)?
            .into_spec()
            .map_err(serde::de::Error::custom)
    }
}

/// Deserializers that never fail on malformed values
///
/// Used with `#[serde(deserialize_with = "...")]` so that a bad entry in the
/// config file degrades to the field default instead of rejecting the file.
pub mod lenient {
    use super::*;

    fn with_fallback<'de, D: Deserializer<'de>>(
        deserializer: D,
        fallback: ParameterSpec,
        field: &str,
    ) -> Result<ParameterSpec, D::Error> {
        let raw = RawParameter::deserialize(deserializer)?;
        Ok(raw.into_spec().unwrap_or_else(|e| {
            tracing::warn!("Invalid {} parameter ({}), using {}", field, e, fallback);
            fallback
        }))
    }

    pub fn interval<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterSpec, D::Error> {
        with_fallback(d, ParameterSpec::INTERVAL, "interval")
    }

    pub fn intensity<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterSpec, D::Error> {
        with_fallback(d, ParameterSpec::INTENSITY, "intensity")
    }

    pub fn duration<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterSpec, D::Error> {
        with_fallback(d, ParameterSpec::DURATION, "duration")
    }

    pub fn scene_duration<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterSpec, D::Error> {
        with_fallback(d, ParameterSpec::SCENE_DURATION, "scene duration")
    }

    pub fn extend_minutes<'de, D: Deserializer<'de>>(d: D) -> Result<ParameterSpec, D::Error> {
        with_fallback(d, ParameterSpec::EXTEND_MINUTES, "extend minutes")
    }

    /// Repeat limits: empty or unparseable means unlimited
    pub fn repeat_limit<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        let limit = match RawParameter::deserialize(d)? {
            RawParameter::Number(v) => to_u32(v).ok(),
            RawParameter::Text(text) if text.trim().is_empty() => None,
            RawParameter::Text(text) => match parse_number(&text) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid repeat limit ({}), treating as unlimited", e);
                    None
                }
            },
            _ => {
                tracing::warn!("Unsupported repeat limit, treating as unlimited");
                None
            }
        };
        Ok(limit)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
