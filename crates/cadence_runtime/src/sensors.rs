//! Contact-Sensor Monitor
//!
//! Polls the contact sensors on its own cadence, concurrently with the scene
//! loop, and dispatches the bound modifiers on every closed→open edge.
//!
//! Only sensors that read closed when the scene starts running are watched,
//! so a door that is already open never triggers its modifiers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use cadence_types::{ContactSensorConfig, SceneConfig};

use crate::client::{ContactReading, ContactSensor};
use crate::context::SceneContext;
use crate::dispatcher::{DispatchOutcome, ModifierDispatcher};

/// A sensor registered for the current run
struct WatchedSensor {
    slot: u8,
    name: String,
    handle: Arc<dyn ContactSensor>,
    /// Last successfully observed state
    open: bool,
}

/// Edge detector for the contact sensors of one scene run
pub struct ContactSensorMonitor {
    ctx: SceneContext,
    run_id: Uuid,
    dispatcher: ModifierDispatcher,
    sensors: Vec<WatchedSensor>,
    poll_interval: Duration,
}

impl ContactSensorMonitor {
    /// Register every sensor that has modifiers bound to it and currently
    /// reads closed
    ///
    /// Returns None when no sensor qualifies.
    pub async fn prepare(
        ctx: SceneContext,
        run_id: Uuid,
        config: &SceneConfig,
        poll_interval: Duration,
    ) -> Option<Self> {
        let mut sensors = Vec::new();
        for sensor in &config.sensors {
            if config.modifiers_for_sensor(sensor.slot).next().is_none() {
                tracing::debug!("{} has no modifiers bound, not monitoring", sensor.display_name());
                continue;
            }
            if let Some(watched) = Self::register(&ctx, sensor).await {
                sensors.push(watched);
            }
        }

        if sensors.is_empty() {
            tracing::info!("No contact sensors to monitor");
            return None;
        }

        tracing::info!("Monitoring {} contact sensors", sensors.len());
        Some(Self {
            dispatcher: ModifierDispatcher::new(ctx.clone(), run_id),
            ctx,
            run_id,
            sensors,
            poll_interval,
        })
    }

    async fn register(ctx: &SceneContext, sensor: &ContactSensorConfig) -> Option<WatchedSensor> {
        let name = sensor.display_name();
        let handle = match ctx.clients().contact_sensor(sensor).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("{} unavailable - {}", name, e);
                ctx.notifier().status(format!("{} unavailable", name));
                return None;
            }
        };

        match handle.read().await {
            Ok(ContactReading::Closed) => Some(WatchedSensor {
                slot: sensor.slot,
                name,
                handle,
                open: false,
            }),
            Ok(ContactReading::Open) => {
                tracing::info!("{} is already open, ignoring for this scene", name);
                ctx.notifier()
                    .status(format!("{} already open - ignored", name));
                None
            }
            Err(e) => {
                tracing::warn!("{} could not be read - {}", name, e);
                None
            }
        }
    }

    /// Slots of the watched sensors
    pub fn slots(&self) -> Vec<u8> {
        self.sensors.iter().map(|s| s.slot).collect()
    }

    /// Run the poll loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll until the run ends
    pub async fn run(mut self) {
        while self.ctx.is_current(self.run_id) {
            self.poll_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
        tracing::debug!("Contact sensor monitor stopped");
    }

    /// Read every sensor once and dispatch modifiers on new openings
    ///
    /// Returns the slots that opened during this poll.
    pub async fn poll_once(&mut self) -> Vec<u8> {
        let readings = join_all(self.sensors.iter().map(|s| s.handle.read())).await;

        let mut opened = Vec::new();
        for (sensor, reading) in self.sensors.iter_mut().zip(readings) {
            match reading {
                Ok(reading) => {
                    let was_open = std::mem::replace(&mut sensor.open, reading.is_open());
                    if reading.is_open() && !was_open {
                        tracing::info!("{} opened", sensor.name);
                        self.ctx.notifier().status(format!("{} opened", sensor.name));
                        opened.push(sensor.slot);
                    }
                }
                // Keep the last state; a failed read is never an edge
                Err(e) => tracing::debug!("{} read failed - {}", sensor.name, e),
            }
        }

        if !opened.is_empty() {
            let config = self.ctx.config();
            for slot in &opened {
                for modifier in config.modifiers_for_sensor(*slot) {
                    let outcome = self.dispatcher.dispatch(modifier.id).await;
                    if outcome != DispatchOutcome::Fired {
                        tracing::debug!("Modifier {} not applied: {:?}", modifier.id, outcome);
                    }
                }
            }
        }

        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClients, test_context};
    use cadence_types::{
        DeviceConfig, DeviceKey, ModifierAction, ModifierConfig, ParameterSpec, ScenePhase,
    };
    use tokio::time::Instant;

    fn config() -> SceneConfig {
        SceneConfig::new(ParameterSpec::Fixed(60), 0)
            .with_device(DeviceConfig::new(DeviceKey::custom(1)))
            .with_sensor(ContactSensorConfig::new(1, "door"))
            .with_sensor(ContactSensorConfig::new(2, "window"))
            .with_sensor(ContactSensorConfig::new(3, "unbound"))
            .with_modifier(ModifierConfig::new(
                1,
                1,
                ModifierAction::ExtendDuration {
                    minutes: ParameterSpec::Fixed(1),
                },
            ))
            .with_modifier(ModifierConfig::new(2, 2, ModifierAction::arm(DeviceKey::custom(1))))
    }

    fn running(clients: &MockClients) -> (SceneContext, Uuid) {
        let ctx = test_context(clients.clone());
        ctx.replace_config(config());
        let run_id = Uuid::new_v4();
        {
            let mut state = ctx.state();
            state.phase = ScenePhase::Running;
            state.run_id = Some(run_id);
            state.end_at = Some(Instant::now() + Duration::from_secs(60));
        }
        (ctx, run_id)
    }

    #[tokio::test]
    async fn test_prepare_skips_open_and_unbound_sensors() {
        let clients = MockClients::new();
        clients.sensor(2).set_open(true);
        let (ctx, run_id) = running(&clients);

        let monitor = ContactSensorMonitor::prepare(ctx, run_id, &config(), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(monitor.slots(), vec![1]);
    }

    #[tokio::test]
    async fn test_prepare_none_when_nothing_qualifies() {
        let clients = MockClients::new();
        clients.sensor(1).set_open(true);
        clients.sensor(2).set_error(true);
        let (ctx, run_id) = running(&clients);

        let monitor =
            ContactSensorMonitor::prepare(ctx, run_id, &config(), Duration::from_millis(500)).await;
        assert!(monitor.is_none());
    }

    #[tokio::test]
    async fn test_only_closed_to_open_edges_dispatch() {
        let clients = MockClients::new();
        let (ctx, run_id) = running(&clients);
        let mut monitor =
            ContactSensorMonitor::prepare(ctx.clone(), run_id, &config(), Duration::from_millis(500))
                .await
                .unwrap();

        assert!(monitor.poll_once().await.is_empty());

        clients.sensor(2).set_open(true);
        assert_eq!(monitor.poll_once().await, vec![2]);
        assert!(ctx.registry().is_armed(DeviceKey::custom(1)));

        // open→open is not an edge
        assert!(monitor.poll_once().await.is_empty());

        // A failed read keeps the last state
        clients.sensor(2).set_error(true);
        assert!(monitor.poll_once().await.is_empty());
        clients.sensor(2).set_error(false);
        assert!(monitor.poll_once().await.is_empty());

        // Reopen is an edge, but the modifier is spent
        clients.sensor(2).set_open(false);
        monitor.poll_once().await;
        clients.sensor(2).set_open(true);
        assert_eq!(monitor.poll_once().await, vec![2]);
        assert_eq!(ctx.notifier().drain_popups().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_exits_when_run_is_cancelled() {
        let clients = MockClients::new();
        let (ctx, run_id) = running(&clients);
        let monitor =
            ContactSensorMonitor::prepare(ctx.clone(), run_id, &config(), Duration::from_millis(500))
                .await
                .unwrap();

        let task = monitor.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        ctx.state().cancelled = true;

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("monitor should stop")
            .unwrap();
    }
}
