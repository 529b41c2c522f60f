//! Device Scheduler
//!
//! Decides on every tick which armed devices are due, resolves their
//! magnitudes and fires them.
//!
//! A device with interval `i` and fire count `n` is due once the seconds
//! elapsed since the running phase began reach `i × (n + 1)`. The interval is
//! resolved again on every evaluation, so a random interval is redrawn each
//! tick until the device fires.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use cadence_types::{DeviceClass, DeviceConfig, ParameterSpec, SceneConfig};

use crate::client::TriggerParams;
use crate::context::SceneContext;
use crate::notify::SceneEvent;

/// Outcome counts for a single tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub failed: usize,
}

/// Fires due devices; owned by the orchestrator loop
pub struct DeviceScheduler {
    rng: StdRng,
}

impl Default for DeviceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceScheduler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Scheduler with a reproducible random sequence
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Whether a device that has fired `count` times is due at `elapsed`
    pub fn is_due(&mut self, interval: &ParameterSpec, count: u32, elapsed: Duration) -> bool {
        let next_interval = interval.resolve_with(&mut self.rng);
        elapsed.as_secs_f64() >= f64::from(next_interval) * f64::from(count + 1)
    }

    /// Resolve the trigger magnitudes for one firing
    pub fn resolve_params(&mut self, device: &DeviceConfig) -> TriggerParams {
        let intensity = device
            .class
            .uses_intensity()
            .then(|| device.intensity.resolve_with(&mut self.rng));
        TriggerParams {
            intensity,
            duration_secs: device.duration.resolve_with(&mut self.rng),
        }
    }

    /// Process every device class once
    pub async fn tick(
        &mut self,
        ctx: &SceneContext,
        config: &SceneConfig,
        elapsed: Duration,
    ) -> TickReport {
        let mut report = TickReport::default();
        for class in DeviceClass::ALL {
            self.tick_class(ctx, config, class, elapsed, &mut report).await;
        }
        report
    }

    async fn tick_class(
        &mut self,
        ctx: &SceneContext,
        config: &SceneConfig,
        class: DeviceClass,
        elapsed: Duration,
        report: &mut TickReport,
    ) {
        for device in config.devices.iter().filter(|d| d.class == class && d.enabled) {
            let key = device.key();
            let Some((handle, count)) = ctx.registry().armed(key) else {
                continue;
            };
            if device.limit_reached(count) {
                continue;
            }
            if !self.is_due(&device.interval, count, elapsed) {
                continue;
            }

            let params = self.resolve_params(device);
            tracing::debug!(
                device = %key,
                elapsed = elapsed.as_secs(),
                intensity = ?params.intensity,
                duration_secs = params.duration_secs,
                "Triggering"
            );

            match handle.trigger(params).await {
                Ok(()) => {
                    let total = ctx.registry().record_fire(key);
                    ctx.notifier()
                        .status(format!("{} activated ({} times)", key, total));
                    ctx.notifier().emit(SceneEvent::DeviceFired {
                        device: key,
                        count: total,
                    });
                    report.fired += 1;
                }
                Err(e) => {
                    tracing::warn!("{} trigger failed - {}", key, e);
                    ctx.notifier().status(format!("{} failed to activate", key));
                    ctx.notifier().emit(SceneEvent::DeviceFailed {
                        device: key,
                        error: e.to_string(),
                    });
                    report.failed += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClients, test_context};
    use cadence_types::DeviceKey;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fixed_interval_threshold() {
        let mut scheduler = DeviceScheduler::seeded(1);
        let interval = ParameterSpec::Fixed(5);

        assert!(!scheduler.is_due(&interval, 0, secs(4)));
        assert!(scheduler.is_due(&interval, 0, secs(5)));
        assert!(!scheduler.is_due(&interval, 1, secs(9)));
        assert!(scheduler.is_due(&interval, 1, secs(10)));
        assert!(scheduler.is_due(&interval, 11, secs(60)));
    }

    #[test]
    fn test_random_interval_redrawn_per_evaluation() {
        // At t=5 with a 2..=10 interval the device fires whenever the fresh
        // draw is at most 5: 4 of 9 equally likely values.
        let mut scheduler = DeviceScheduler::seeded(42);
        let interval = ParameterSpec::random(2, 10);
        let trials = 20_000;

        let due = (0..trials)
            .filter(|_| scheduler.is_due(&interval, 0, secs(5)))
            .count();
        let rate = due as f64 / trials as f64;
        assert!((rate - 4.0 / 9.0).abs() < 0.02, "rate {}", rate);
    }

    #[test]
    fn test_redraw_pulls_first_firing_earlier_than_single_draw() {
        // Redrawing every tick gives an expected first firing near 4.46s,
        // while drawing once per firing would average 6s.
        let mut scheduler = DeviceScheduler::seeded(7);
        let interval = ParameterSpec::random(2, 10);
        let trials = 5_000;

        let total: u64 = (0..trials)
            .map(|_| {
                (0..=10)
                    .find(|t| scheduler.is_due(&interval, 0, secs(*t)))
                    .unwrap_or(10)
            })
            .sum();
        let mean = total as f64 / trials as f64;
        assert!((4.2..4.75).contains(&mean), "mean first firing {}", mean);
    }

    #[test]
    fn test_resolve_params_by_class() {
        let mut scheduler = DeviceScheduler::seeded(3);

        let haptic = DeviceConfig::new(DeviceKey::haptic(1))
            .with_intensity(ParameterSpec::random(10, 20))
            .with_duration(ParameterSpec::Fixed(2));
        let params = scheduler.resolve_params(&haptic);
        assert!((10..=20).contains(&params.intensity.unwrap()));
        assert_eq!(params.duration_secs, 2);

        let mechanical = DeviceConfig::new(DeviceKey::mechanical(1));
        assert_eq!(scheduler.resolve_params(&mechanical).intensity, None);
    }

    #[tokio::test]
    async fn test_tick_fires_due_devices_and_respects_limit() {
        let clients = MockClients::new();
        let ctx = test_context(clients.clone());
        let config = SceneConfig::new(ParameterSpec::Fixed(60), 0)
            .with_device(
                DeviceConfig::new(DeviceKey::haptic(1))
                    .with_enabled(true)
                    .with_interval(ParameterSpec::Fixed(1))
                    .with_repeat_limit(2),
            )
            .with_device(
                DeviceConfig::new(DeviceKey::mechanical(1))
                    .with_enabled(true)
                    .with_interval(ParameterSpec::Fixed(100)),
            );
        ctx.registry()
            .initialize(&config, &clients, false, ctx.notifier())
            .await;

        let mut scheduler = DeviceScheduler::seeded(0);
        let mut fired = 0;
        for t in 0..10 {
            fired += scheduler.tick(&ctx, &config, secs(t)).await.fired;
        }

        assert_eq!(fired, 2);
        assert_eq!(ctx.registry().fire_count(DeviceKey::haptic(1)), 2);
        assert_eq!(clients.device(DeviceKey::mechanical(1)).triggers().len(), 0);
    }

    #[tokio::test]
    async fn test_failed_trigger_does_not_count() {
        let clients = MockClients::new();
        clients.device(DeviceKey::haptic(1)).fail_next(1);
        let ctx = test_context(clients.clone());
        let config = SceneConfig::new(ParameterSpec::Fixed(60), 0).with_device(
            DeviceConfig::new(DeviceKey::haptic(1))
                .with_enabled(true)
                .with_interval(ParameterSpec::Fixed(5)),
        );
        ctx.registry()
            .initialize(&config, &clients, false, ctx.notifier())
            .await;

        let mut scheduler = DeviceScheduler::seeded(0);
        let report = scheduler.tick(&ctx, &config, secs(5)).await;
        assert_eq!(report, TickReport { fired: 0, failed: 1 });
        assert_eq!(ctx.registry().fire_count(DeviceKey::haptic(1)), 0);

        // Same opportunity retried on the next tick
        let report = scheduler.tick(&ctx, &config, secs(6)).await;
        assert_eq!(report, TickReport { fired: 1, failed: 0 });
        assert_eq!(ctx.registry().fire_count(DeviceKey::haptic(1)), 1);
    }
}
