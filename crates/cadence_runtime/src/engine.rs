//! Scene Orchestrator
//!
//! Owns the scene state machine:
//!
//! ```text
//! Idle ──start──▶ Delaying ──delay over──▶ Running ──deadline──▶ Idle
//!                    │                        │
//!                    └──stop──▶ Idle          └──stop / killswitch──▶ Idle
//! ```
//!
//! `start` claims the single scene slot synchronously, so a second start while
//! a scene is active is rejected rather than queued. The scene itself runs on
//! a spawned task; `stop` and `status` only touch the shared state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use uuid::Uuid;

use cadence_types::{
    EnabledSnapshot, EndReason, SceneConfig, SceneOutcome, ScenePhase, SceneStatus,
};

use crate::client::{ConfigStore, DeviceClients, WebhookCaller};
use crate::context::{SceneContext, SceneState};
use crate::error::{SceneError, SceneResult, StoreError};
use crate::killswitch::{KillswitchCheck, KillswitchMonitor};
use crate::notify::{NotificationLevel, Notifier, SceneEvent};
use crate::scheduler::DeviceScheduler;
use crate::sensors::ContactSensorMonitor;

/// Longest single sleep while waiting out the initial delay
const DELAY_STEP: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Options & Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Engine timing knobs
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Main loop period
    pub tick: Duration,
    /// Contact sensor poll period
    pub sensor_poll: Duration,
    /// Seed for the scheduler's random draws
    pub rng_seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            sensor_poll: Duration::from_millis(500),
            rng_seed: None,
        }
    }
}

/// Handle to a started scene
#[derive(Debug)]
pub struct SceneHandle {
    run_id: Uuid,
    join: JoinHandle<SceneOutcome>,
}

impl SceneHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the scene to end
    pub async fn wait(self) -> SceneResult<SceneOutcome> {
        self.join
            .await
            .map_err(|e| SceneError::TaskFailed(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Start/stop/status surface over the scene state machine
#[derive(Clone)]
pub struct SceneEngine {
    ctx: SceneContext,
    options: EngineOptions,
}

impl SceneEngine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        clients: Arc<dyn DeviceClients>,
        webhook: Arc<dyn WebhookCaller>,
    ) -> Self {
        Self {
            ctx: SceneContext::new(store, clients, webhook),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Reload the live configuration from the store
    pub async fn load_config(&self) -> Result<SceneConfig, StoreError> {
        let config = self.ctx.store().load().await?;
        for issue in config.validate() {
            tracing::warn!("Configuration issue: {}", issue);
        }
        self.ctx.replace_config(config.clone());
        Ok(config)
    }

    /// Live configuration, as the dashboard shows it
    pub fn config(&self) -> SceneConfig {
        self.ctx.config()
    }

    pub fn notifier(&self) -> &Notifier {
        self.ctx.notifier()
    }

    pub fn context(&self) -> &SceneContext {
        &self.ctx
    }

    /// Phase and remaining time; never blocks on the scene task
    pub fn status(&self) -> SceneStatus {
        self.ctx.state().status(Instant::now())
    }

    /// Request the active scene to stop
    ///
    /// Idempotent; returns false when no scene is active.
    pub fn stop(&self) -> bool {
        let mut state = self.ctx.state();
        if state.phase == ScenePhase::Idle || state.run_id.is_none() {
            return false;
        }
        if !state.cancelled {
            state.cancelled = true;
            tracing::info!("Stop requested");
        }
        true
    }

    /// Start a scene
    ///
    /// Fails with [`SceneError::AlreadyRunning`] unless the engine is idle;
    /// the active scene is not affected.
    pub async fn start(&self, dry_run: bool) -> SceneResult<SceneHandle> {
        let run_id = Uuid::new_v4();
        {
            let mut state = self.ctx.state();
            if state.phase != ScenePhase::Idle {
                tracing::warn!("Scene already running - start ignored");
                return Err(SceneError::AlreadyRunning);
            }
            *state = SceneState {
                phase: ScenePhase::Delaying,
                run_id: Some(run_id),
                dry_run,
                started_at: Some(Instant::now()),
                ..SceneState::default()
            };
        }

        let notifier = self.ctx.notifier();
        if dry_run {
            notifier.status("Scene starting (dry run)...");
        } else {
            notifier.status("Scene starting...");
        }

        let config = match self.load_config().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load scene configuration, using current: {}", e);
                self.ctx.config()
            }
        };
        let snapshot = config.enabled_snapshot();

        let duration = Duration::from_secs(u64::from(config.scene.duration.resolve()));
        let mut delay = Duration::from_secs(config.scene.initial_delay_secs);
        notifier.status(format!("Scene Duration: {}", format_minutes(duration)));

        let now = Instant::now();
        let end_at = match now.checked_add(delay).and_then(|t| t.checked_add(duration)) {
            Some(end_at) => end_at,
            None => {
                tracing::warn!(
                    delay_secs = delay.as_secs(),
                    "Initial delay out of range, starting without delay"
                );
                delay = Duration::ZERO;
                now.checked_add(duration).unwrap_or(now)
            }
        };
        {
            let mut state = self.ctx.state();
            state.end_at = Some(end_at);
            if delay.is_zero() {
                state.phase = ScenePhase::Running;
            } else {
                state.delay_end = Some(now + delay);
            }
        }
        if !delay.is_zero() {
            notifier.emit(SceneEvent::PhaseChanged {
                phase: ScenePhase::Delaying,
            });
        }
        tracing::info!(
            %run_id,
            dry_run,
            duration_secs = duration.as_secs(),
            delay_secs = delay.as_secs(),
            "Scene started"
        );

        let engine = self.clone();
        let join = tokio::spawn(async move { engine.run(run_id, config, snapshot, delay).await });
        Ok(SceneHandle { run_id, join })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scene task
    // ─────────────────────────────────────────────────────────────────────────

    async fn run(
        self,
        run_id: Uuid,
        config: SceneConfig,
        snapshot: EnabledSnapshot,
        delay: Duration,
    ) -> SceneOutcome {
        if !delay.is_zero() {
            self.ctx
                .notifier()
                .status(format!("Waiting {}s before starting...", delay.as_secs()));
            if !self.wait_for_delay(run_id).await {
                tracing::info!("Scene cancelled during initial delay");
                return self.finish(&config, &snapshot, false).await;
            }
            self.ctx
                .notifier()
                .status("Initial delay complete - scene starting now...");
        }

        let ran = self.run_scene(run_id, &config).await;
        self.finish(&config, &snapshot, ran).await
    }

    /// Sleep until the delay ends, re-checking cancellation every step
    async fn wait_for_delay(&self, run_id: Uuid) -> bool {
        loop {
            let delay_end = {
                let state = self.ctx.state();
                if !state.is_current(run_id) {
                    return false;
                }
                state.delay_end
            };
            let now = Instant::now();
            match delay_end {
                Some(end) if now < end => sleep((end - now).min(DELAY_STEP)).await,
                _ => return true,
            }
        }
    }

    /// Running phase; returns false when cancelled before it began
    async fn run_scene(&self, run_id: Uuid, config: &SceneConfig) -> bool {
        let running_since = Instant::now();
        let dry_run = {
            let mut state = self.ctx.state();
            if !state.is_current(run_id) {
                return false;
            }
            state.phase = ScenePhase::Running;
            state.delay_end = None;
            state.running_since = Some(running_since);
            state.dry_run
        };
        self.ctx.notifier().emit(SceneEvent::PhaseChanged {
            phase: ScenePhase::Running,
        });

        self.ctx
            .call_webhook(config.lock.engage_webhook.as_deref(), "Lock engage")
            .await;

        let notifier = self.ctx.notifier();
        self.ctx
            .registry()
            .initialize(config, self.ctx.clients(), dry_run, notifier)
            .await;
        let killswitch =
            KillswitchMonitor::arm(config.killswitch.as_ref(), self.ctx.clients(), notifier).await;

        // Detached; the monitor exits on its own once the run is no longer current
        if let Some(monitor) =
            ContactSensorMonitor::prepare(self.ctx.clone(), run_id, config, self.options.sensor_poll)
                .await
        {
            monitor.spawn();
        }

        let mut scheduler = match self.options.rng_seed {
            Some(seed) => DeviceScheduler::seeded(seed),
            None => DeviceScheduler::new(),
        };

        let mut next_tick = running_since;
        loop {
            let now = Instant::now();
            {
                let state = self.ctx.state();
                if !state.is_current(run_id) {
                    break;
                }
                // Inclusive: the tick landing on the deadline still runs
                if state.end_at.is_none_or(|end| now > end) {
                    break;
                }
            }

            if killswitch.check().await == KillswitchCheck::Tripped {
                self.abort(&killswitch).await;
                break;
            }

            let live = self.ctx.config();
            let report = scheduler
                .tick(&self.ctx, &live, now.saturating_duration_since(running_since))
                .await;
            if report.fired > 0 || report.failed > 0 {
                tracing::debug!(fired = report.fired, failed = report.failed, "Tick complete");
            }

            next_tick += self.options.tick;
            sleep_until(next_tick).await;
        }

        true
    }

    /// Killswitch tripped: cancel, notify once and call the abort webhook
    async fn abort(&self, killswitch: &KillswitchMonitor) {
        {
            let mut state = self.ctx.state();
            state.cancelled = true;
            state.abort_reason = Some("Killswitch device turned off".into());
        }

        tracing::warn!("Killswitch triggered - aborting scene");
        let notifier = self.ctx.notifier();
        notifier.popup(
            NotificationLevel::Alert,
            "Killswitch Triggered",
            "The killswitch device turned off. The scene has been stopped.",
        );
        notifier.emit(SceneEvent::KillswitchAbort);

        self.ctx
            .call_webhook(killswitch.abort_webhook(), "Abort webhook")
            .await;
    }

    /// Leave the active scene and return to Idle
    async fn finish(
        &self,
        config: &SceneConfig,
        snapshot: &EnabledSnapshot,
        ran: bool,
    ) -> SceneOutcome {
        let (reason, running_secs) = {
            let mut state = self.ctx.state();
            let reason = if state.abort_reason.is_some() {
                EndReason::Aborted
            } else if state.cancelled {
                EndReason::Stopped
            } else {
                EndReason::Completed
            };
            state.phase = ScenePhase::Terminating;
            state.cancelled = true;
            let running_secs = state
                .running_since
                .map(|since| since.elapsed().as_secs())
                .unwrap_or(0);
            (reason, running_secs)
        };
        let notifier = self.ctx.notifier();
        notifier.emit(SceneEvent::PhaseChanged {
            phase: ScenePhase::Terminating,
        });

        if ran {
            self.ctx
                .call_webhook(config.lock.disengage_webhook.as_deref(), "Lock disengage")
                .await;
        }

        // Devices armed by modifiers must not stay enabled for the next run
        if self.ctx.update_config(|live| live.restore_enabled(snapshot)) {
            tracing::info!("Restored device enabled flags");
            self.ctx.persist_config().await;
        }

        let fire_counts = self.ctx.registry().fire_counts();
        self.ctx.registry().clear();

        *self.ctx.state() = SceneState::default();
        notifier.emit(SceneEvent::PhaseChanged {
            phase: ScenePhase::Idle,
        });

        let message = match reason {
            EndReason::Completed => "Scene completed",
            EndReason::Stopped => "Scene stopped by user",
            EndReason::Aborted => "Scene aborted by killswitch",
        };
        tracing::info!(?reason, running_secs, "Scene finished");
        notifier.status(message);
        notifier.emit(SceneEvent::SceneFinished { reason });

        SceneOutcome {
            reason,
            fire_counts,
            running_secs,
        }
    }
}

fn format_minutes(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs % 60 {
        0 => format!("{}m", secs / 60),
        rest => format!("{}m {}s", secs / 60, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConfigStore, MockClients, RecordingWebhook};
    use cadence_types::{DeviceConfig, DeviceKey, ParameterSpec};

    fn engine(config: SceneConfig) -> SceneEngine {
        SceneEngine::new(
            Arc::new(MemoryConfigStore::new(config)),
            Arc::new(MockClients::new()),
            Arc::new(RecordingWebhook::new()),
        )
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(Duration::from_secs(600)), "10m");
        assert_eq!(format_minutes(Duration::from_secs(90)), "1m 30s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sets_phase_from_delay() {
        let engine = engine(SceneConfig::new(ParameterSpec::Fixed(60), 10));

        let handle = engine.start(false).await.unwrap();
        assert_eq!(engine.context().state().run_id, Some(handle.run_id()));
        let status = engine.status();
        assert_eq!(status.phase, ScenePhase::Delaying);
        assert_eq!(status.seconds_remaining, 10);
        assert_eq!(status.scene_seconds_remaining, 70);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let status = engine.status();
        assert_eq!(status.phase, ScenePhase::Running);
        assert_eq!(status.seconds_remaining, 59);

        assert!(engine.stop());
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.reason, EndReason::Stopped);
        assert_eq!(engine.status(), SceneStatus::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_delay_starts_immediately() {
        let clients = MockClients::new();
        let engine = SceneEngine::new(
            Arc::new(MemoryConfigStore::new(
                SceneConfig::new(ParameterSpec::Fixed(20), u64::MAX).with_device(
                    DeviceConfig::new(DeviceKey::haptic(1))
                        .with_enabled(true)
                        .with_interval(ParameterSpec::Fixed(5)),
                ),
            )),
            Arc::new(clients.clone()),
            Arc::new(RecordingWebhook::new()),
        );

        let handle = engine.start(false).await.unwrap();
        let status = engine.status();
        assert_eq!(status.phase, ScenePhase::Running);
        assert_eq!(status.seconds_remaining, 20);

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.reason, EndReason::Completed);
        assert_eq!(outcome.fired(DeviceKey::haptic(1)), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let engine = engine(SceneConfig::new(ParameterSpec::Fixed(60), 0));
        assert!(!engine.stop());
        assert_eq!(engine.status().phase, ScenePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_falls_back_to_live_config() {
        let store = Arc::new(MemoryConfigStore::new(SceneConfig::new(
            ParameterSpec::Fixed(30),
            0,
        )));
        let clients = MockClients::new();
        let engine = SceneEngine::new(
            store.clone(),
            Arc::new(clients.clone()),
            Arc::new(RecordingWebhook::new()),
        );
        engine.load_config().await.unwrap();
        engine.context().update_config(|config| {
            config.devices.push(
                DeviceConfig::new(DeviceKey::haptic(1))
                    .with_enabled(true)
                    .with_interval(ParameterSpec::Fixed(10)),
            );
        });
        store.fail_load(true);

        let outcome = engine.start(false).await.unwrap().wait().await.unwrap();
        assert_eq!(outcome.reason, EndReason::Completed);
        assert_eq!(outcome.fired(DeviceKey::haptic(1)), 3);
    }
}
