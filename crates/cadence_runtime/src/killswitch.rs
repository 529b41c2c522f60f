//! Killswitch Monitor
//!
//! Watches a single guard device, checked once per scene tick. The guard must
//! read "on" when the scene starts running; otherwise monitoring stays off
//! for the whole run.

use std::sync::Arc;

use cadence_types::KillswitchConfig;

use crate::client::{DeviceClients, SwitchReading, SwitchSensor};
use crate::notify::Notifier;

/// Result of a per-tick killswitch check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillswitchCheck {
    Clear,
    Tripped,
}

struct Guard {
    config: KillswitchConfig,
    handle: Arc<dyn SwitchSensor>,
}

/// Killswitch state for one scene run
pub struct KillswitchMonitor {
    guard: Option<Guard>,
}

impl KillswitchMonitor {
    /// A monitor that never trips
    pub fn disabled() -> Self {
        Self { guard: None }
    }

    /// Connect to the guard device and verify it currently reads on
    pub async fn arm(
        config: Option<&KillswitchConfig>,
        clients: &dyn DeviceClients,
        notifier: &Notifier,
    ) -> Self {
        let Some(config) = config.filter(|c| c.enabled && !c.target.trim().is_empty()) else {
            tracing::debug!("Killswitch not configured");
            return Self::disabled();
        };

        let handle = match clients.switch(config).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Killswitch device unavailable - {}", e);
                notifier.status("Killswitch disabled - device unavailable");
                return Self::disabled();
            }
        };

        match handle.read().await {
            Ok(SwitchReading::On) => {
                tracing::info!("Killswitch armed (target: {})", config.target);
                notifier.status("Killswitch armed");
                Self {
                    guard: Some(Guard {
                        config: config.clone(),
                        handle,
                    }),
                }
            }
            Ok(SwitchReading::Off) => {
                tracing::warn!("Killswitch device is off at scene start, disabling for this scene");
                notifier.status("Killswitch disabled - device is off");
                Self::disabled()
            }
            Err(e) => {
                tracing::error!("Killswitch status unreadable at scene start - {}", e);
                notifier.status("Killswitch disabled - status unreadable");
                Self::disabled()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }

    /// Webhook to call when the killswitch aborts the scene
    pub fn abort_webhook(&self) -> Option<&str> {
        self.guard.as_ref()?.config.abort_webhook.as_deref()
    }

    /// Read the guard device once
    ///
    /// A failed read counts as clear unless the configuration treats an
    /// unreachable device as off.
    pub async fn check(&self) -> KillswitchCheck {
        let Some(guard) = &self.guard else {
            return KillswitchCheck::Clear;
        };

        match guard.handle.read().await {
            Ok(SwitchReading::On) => KillswitchCheck::Clear,
            Ok(SwitchReading::Off) => {
                tracing::warn!("Killswitch device reported off");
                KillswitchCheck::Tripped
            }
            Err(e) if guard.config.unreachable_is_off => {
                tracing::warn!("Killswitch device unreachable, treating as off - {}", e);
                KillswitchCheck::Tripped
            }
            Err(e) => {
                tracing::warn!("Killswitch status check failed, continuing - {}", e);
                KillswitchCheck::Clear
            }
        }
    }
}
