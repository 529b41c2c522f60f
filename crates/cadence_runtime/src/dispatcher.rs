//! Modifier Dispatcher
//!
//! Applies one-shot modifier rules to the running scene. Each modifier fires
//! at most once per run; the fired set lives in the shared scene state and is
//! cleared when a new scene starts.

use std::time::Duration;

use uuid::Uuid;

use cadence_types::{DeviceKey, ModifierAction, ModifierConfig};

use crate::context::SceneContext;
use crate::notify::{NotificationLevel, SceneEvent};

/// Result of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Fired,
    AlreadyFired,
    NotFound,
    /// The run this dispatcher belongs to has ended
    Inactive,
    /// The action failed; the modifier stays eligible
    Failed,
}

/// Dispatches modifiers for a single scene run
#[derive(Clone)]
pub struct ModifierDispatcher {
    ctx: SceneContext,
    run_id: Uuid,
}

impl ModifierDispatcher {
    pub fn new(ctx: SceneContext, run_id: Uuid) -> Self {
        Self { ctx, run_id }
    }

    /// Fire modifier `id` unless it already fired this run
    pub async fn dispatch(&self, id: u8) -> DispatchOutcome {
        {
            let state = self.ctx.state();
            if !state.is_current(self.run_id) {
                return DispatchOutcome::Inactive;
            }
            if state.fired_modifiers.contains(&id) {
                tracing::debug!("Modifier {} already fired this scene", id);
                return DispatchOutcome::AlreadyFired;
            }
        }

        let Some(modifier) = self.ctx.config().modifier(id).cloned() else {
            tracing::warn!("Modifier {} is not configured", id);
            return DispatchOutcome::NotFound;
        };

        let summary = match &modifier.action {
            ModifierAction::ExtendDuration { minutes } => {
                match self.extend(minutes.resolve()) {
                    Some(summary) => summary,
                    None => return DispatchOutcome::Inactive,
                }
            }
            action => {
                let Some(key) = action.arm_target() else {
                    return DispatchOutcome::Failed;
                };
                if let Err(outcome) = self.arm(key).await {
                    return outcome;
                }
                format!("{} armed", key)
            }
        };

        self.mark_fired(&modifier, &summary)
    }

    /// Push the live deadline back; None when the run ended meanwhile
    fn extend(&self, minutes: u32) -> Option<String> {
        let secs = u64::from(minutes) * 60;
        {
            let mut state = self.ctx.state();
            if !state.is_current(self.run_id) {
                return None;
            }
            let end_at = state.end_at?;
            state.end_at = Some(end_at + Duration::from_secs(secs));
        }

        tracing::info!("Scene deadline extended by {} minutes", minutes);
        self.ctx.notifier().emit(SceneEvent::DeadlineExtended { secs });
        Some(format!("Scene extended by {} minutes", minutes))
    }

    /// Enable a device in the live configuration and arm it
    ///
    /// The flag is only written while the run is current, so a run that has
    /// started finishing never gets a device re-enabled after its restore.
    async fn arm(&self, key: DeviceKey) -> Result<(), DispatchOutcome> {
        let device = {
            let state = self.ctx.state();
            if !state.is_current(self.run_id) {
                return Err(DispatchOutcome::Inactive);
            }
            self.ctx.update_config(|config| {
                config.device_mut(key).map(|device| {
                    device.enabled = true;
                    device.clone()
                })
            })
        };
        let Some(device) = device else {
            tracing::warn!("Cannot arm {}: slot is not configured", key);
            self.ctx
                .notifier()
                .status(format!("{} is not configured", key));
            return Err(DispatchOutcome::Failed);
        };

        self.ctx.persist_config().await;

        let dry_run = self.ctx.state().dry_run;
        let result = self
            .ctx
            .registry()
            .arm(&device, self.ctx.clients(), dry_run, self.ctx.notifier())
            .await;
        result.map_err(|_| DispatchOutcome::Failed)
    }

    fn mark_fired(&self, modifier: &ModifierConfig, summary: &str) -> DispatchOutcome {
        {
            let mut state = self.ctx.state();
            if !state.is_current(self.run_id) {
                return DispatchOutcome::Inactive;
            }
            if !state.fired_modifiers.insert(modifier.id) {
                return DispatchOutcome::AlreadyFired;
            }
        }

        tracing::info!("Modifier {} fired: {}", modifier.id, summary);
        let notifier = self.ctx.notifier();
        notifier.status(format!("Modifier {}: {}", modifier.id, summary));
        notifier.popup(
            NotificationLevel::Info,
            format!("Modifier {} Activated", modifier.id),
            summary,
        );
        notifier.emit(SceneEvent::ModifierFired { id: modifier.id });
        DispatchOutcome::Fired
    }
}
