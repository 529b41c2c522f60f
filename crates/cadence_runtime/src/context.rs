//! Shared Scene Context
//!
//! Everything the orchestrator loop and the contact-sensor monitor share:
//! the scene state, the live configuration, the device registry, the
//! notification sinks and the collaborator handles. One coarse mutex guards
//! the scene state; no guard is ever held across an await point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use cadence_types::{HttpMethod, SceneConfig, ScenePhase, SceneStatus};

use crate::client::{ConfigStore, DeviceClients, WebhookCaller};
use crate::notify::Notifier;
use crate::registry::DeviceRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Scene State
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable state of the active scene
#[derive(Debug, Default)]
pub struct SceneState {
    pub phase: ScenePhase,
    /// Identifies the active run; background tasks compare against it
    pub run_id: Option<Uuid>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: Option<Instant>,
    pub running_since: Option<Instant>,
    /// Only set while delaying
    pub delay_end: Option<Instant>,
    pub end_at: Option<Instant>,
    /// Modifiers already fired this run
    pub fired_modifiers: HashSet<u8>,
    pub abort_reason: Option<String>,
}

impl SceneState {
    /// Whether `run_id` is the active, uncancelled run
    pub fn is_current(&self, run_id: Uuid) -> bool {
        self.run_id == Some(run_id) && !self.cancelled
    }

    /// Time left until the deadline
    pub fn remaining(&self, now: Instant) -> Duration {
        self.end_at
            .map(|end| end.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Delaying reports the time left before the scene runs; Running the
    /// time left before the deadline.
    pub fn status(&self, now: Instant) -> SceneStatus {
        let seconds_remaining = match self.phase {
            ScenePhase::Delaying => self
                .delay_end
                .map(|end| end.saturating_duration_since(now).as_secs())
                .unwrap_or_default(),
            ScenePhase::Running => self.remaining(now).as_secs(),
            ScenePhase::Idle | ScenePhase::Terminating => 0,
        };
        let scene_seconds_remaining = match self.phase {
            ScenePhase::Delaying | ScenePhase::Running => self.remaining(now).as_secs(),
            ScenePhase::Idle | ScenePhase::Terminating => 0,
        };
        SceneStatus {
            phase: self.phase,
            seconds_remaining,
            scene_seconds_remaining,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scene Context
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to the shared scene resources
#[derive(Clone)]
pub struct SceneContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    state: Mutex<SceneState>,

    /// Live configuration; re-read every tick and shown on the dashboard
    config: RwLock<SceneConfig>,

    registry: DeviceRegistry,
    notifier: Notifier,

    /// Serializes saves so the last write always carries the latest config
    save_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn ConfigStore>,
    clients: Arc<dyn DeviceClients>,
    webhook: Arc<dyn WebhookCaller>,
}

impl SceneContext {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        clients: Arc<dyn DeviceClients>,
        webhook: Arc<dyn WebhookCaller>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(SceneState::default()),
                config: RwLock::new(SceneConfig::default()),
                registry: DeviceRegistry::new(),
                notifier: Notifier::new(),
                save_lock: tokio::sync::Mutex::new(()),
                store,
                clients,
                webhook,
            }),
        }
    }

    /// Lock the scene state
    pub fn state(&self) -> MutexGuard<'_, SceneState> {
        self.inner.state.lock()
    }

    /// Whether `run_id` is the active, uncancelled run
    pub fn is_current(&self, run_id: Uuid) -> bool {
        self.state().is_current(run_id)
    }

    /// Copy of the live configuration
    pub fn config(&self) -> SceneConfig {
        self.inner.config.read().clone()
    }

    /// Mutate the live configuration in place
    pub fn update_config<R>(&self, f: impl FnOnce(&mut SceneConfig) -> R) -> R {
        f(&mut self.inner.config.write())
    }

    pub(crate) fn replace_config(&self, config: SceneConfig) {
        *self.inner.config.write() = config;
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn clients(&self) -> &dyn DeviceClients {
        self.inner.clients.as_ref()
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.inner.store.as_ref()
    }

    /// Write the live configuration back to the store
    ///
    /// Failures are logged; the in-memory configuration stays authoritative.
    /// Saves run one at a time and each snapshots the config under the lock.
    pub async fn persist_config(&self) -> bool {
        let _saving = self.inner.save_lock.lock().await;
        let config = self.config();
        match self.inner.store.save(&config).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save scene configuration: {}", e);
                false
            }
        }
    }

    /// Call a configured webhook, reporting the result to the status log
    ///
    /// Returns false when no URL is configured or the call failed. Dry-run
    /// scenes log the call instead of making it.
    pub async fn call_webhook(&self, url: Option<&str>, description: &str) -> bool {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            tracing::debug!("No URL configured for {}", description);
            return false;
        };

        let dry_run = self.state().dry_run;
        if dry_run {
            tracing::info!("[dry run] webhook {} - {}", description, url);
            self.notifier()
                .status(format!("{} skipped (dry run)", description));
            return true;
        }

        tracing::info!("WEBHOOK: Calling {} - {}", description, url);
        match self.inner.webhook.invoke(url, HttpMethod::Get, None).await {
            Ok(()) => {
                self.notifier().status(format!("{} successful", description));
                true
            }
            Err(e) => {
                tracing::warn!("WEBHOOK: {} failed - {}", description, e);
                self.notifier()
                    .status(format!("{} failed - {}", description, e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConfigStore, MockClients, RecordingWebhook};
    use cadence_types::{DeviceConfig, DeviceKey};

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_remaining_time_per_phase() {
        let now = Instant::now();
        let mut state = SceneState {
            phase: ScenePhase::Delaying,
            delay_end: Some(now + Duration::from_secs(30)),
            end_at: Some(now + Duration::from_secs(90)),
            ..Default::default()
        };
        let status = state.status(now);
        assert_eq!(status.seconds_remaining, 30);
        assert_eq!(status.scene_seconds_remaining, 90);

        state.phase = ScenePhase::Running;
        let status = state.status(now);
        assert_eq!(status.seconds_remaining, 90);
        assert_eq!(status.scene_seconds_remaining, 90);

        state.phase = ScenePhase::Terminating;
        assert_eq!(state.status(now), SceneStatus {
            phase: ScenePhase::Terminating,
            seconds_remaining: 0,
            scene_seconds_remaining: 0,
        });

        state.phase = ScenePhase::Running;
        assert_eq!(state.status(now + Duration::from_secs(100)).seconds_remaining, 0);
    }

    #[test]
    fn test_is_current_requires_matching_uncancelled_run() {
        let run_id = Uuid::new_v4();
        let mut state = SceneState {
            run_id: Some(run_id),
            ..Default::default()
        };
        assert!(state.is_current(run_id));
        assert!(!state.is_current(Uuid::new_v4()));

        state.cancelled = true;
        assert!(!state.is_current(run_id));
    }

    #[tokio::test]
    async fn test_failed_webhook_is_reported() {
        let webhook = Arc::new(RecordingWebhook::new());
        webhook.fail_all(true);
        let ctx = SceneContext::new(
            Arc::new(MemoryConfigStore::default()),
            Arc::new(MockClients::new()),
            webhook.clone(),
        );

        assert!(!ctx.call_webhook(Some("http://lock/engage"), "Lock engage").await);
        assert!(!ctx.call_webhook(Some("  "), "Lock disengage").await);
        assert_eq!(webhook.calls(), vec!["http://lock/engage"]);
        assert!(
            ctx.notifier()
                .status_lines()
                .iter()
                .any(|l| l.ends_with("Lock engage failed - device rejected the request: HTTP 500"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_are_ordered() {
        let store = Arc::new(MemoryConfigStore::default());
        let ctx = SceneContext::new(
            store.clone(),
            Arc::new(MockClients::new()),
            Arc::new(RecordingWebhook::new()),
        );
        let key = DeviceKey::mechanical(1);
        ctx.replace_config(SceneConfig::default().with_device(DeviceConfig::new(key)));

        // A slow save of the enabled flag
        ctx.update_config(|config| config.device_mut(key).map(|d| d.enabled = true));
        store.delay_next_save(Duration::from_secs(5));
        let slow = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.persist_config().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Restored and saved while the first save is still in flight
        ctx.update_config(|config| config.device_mut(key).map(|d| d.enabled = false));
        assert!(ctx.persist_config().await);
        assert!(slow.await.unwrap());

        assert_eq!(store.save_count(), 2);
        assert!(!store.saved().is_enabled(key));
    }
}
