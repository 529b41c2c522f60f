//! Notification Sinks
//!
//! The engine only appends: status lines go to a bounded rolling log, popups
//! to a bounded queue, and typed events to a broadcast channel. A
//! presentation layer drains them.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use cadence_types::{DeviceKey, EndReason, ScenePhase};

/// Lines kept in the rolling status log
pub const STATUS_LOG_CAPACITY: usize = 50;

/// Undelivered popups kept before the oldest is dropped
pub const POPUP_CAPACITY: usize = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// How loudly a popup should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    /// Presented with an audio cue
    Alert,
}

/// A human-facing popup
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Machine-readable scene event
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    PhaseChanged { phase: ScenePhase },
    DeviceArmed { device: DeviceKey },
    DeviceFired { device: DeviceKey, count: u32 },
    DeviceFailed { device: DeviceKey, error: String },
    ModifierFired { id: u8 },
    DeadlineExtended { secs: u64 },
    KillswitchAbort,
    SceneFinished { reason: EndReason },
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only sinks shared by every part of the engine
pub struct Notifier {
    status_log: Mutex<VecDeque<String>>,
    popups: Mutex<VecDeque<Notification>>,
    events: broadcast::Sender<SceneEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            status_log: Mutex::new(VecDeque::with_capacity(STATUS_LOG_CAPACITY)),
            popups: Mutex::new(VecDeque::with_capacity(POPUP_CAPACITY)),
            events,
        }
    }

    /// Append a timestamped line to the status log
    pub fn status(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        tracing::info!("STATUS: {}", message);

        let mut log = self.status_log.lock();
        if log.len() == STATUS_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(line);
    }

    /// Queue a popup for the presentation layer
    pub fn popup(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) {
        let notification = Notification {
            level,
            title: title.into(),
            message: message.into(),
            timestamp: Local::now(),
        };

        let mut popups = self.popups.lock();
        if popups.len() == POPUP_CAPACITY {
            popups.pop_front();
        }
        popups.push_back(notification);
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: SceneEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
        self.events.subscribe()
    }

    /// Current status log, oldest first
    pub fn status_lines(&self) -> Vec<String> {
        self.status_log.lock().iter().cloned().collect()
    }

    pub fn clear_status(&self) {
        self.status_log.lock().clear();
        tracing::info!("Status log cleared");
    }

    /// Take every queued popup
    pub fn drain_popups(&self) -> Vec<Notification> {
        self.popups.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_log_is_bounded() {
        let notifier = Notifier::new();
        for i in 0..(STATUS_LOG_CAPACITY + 5) {
            notifier.status(format!("message {}", i));
        }

        let lines = notifier.status_lines();
        assert_eq!(lines.len(), STATUS_LOG_CAPACITY);
        assert!(lines[0].ends_with("message 5"));
        assert!(lines[0].starts_with('['));

        notifier.clear_status();
        assert!(notifier.status_lines().is_empty());
    }

    #[test]
    fn test_popups_drop_oldest() {
        let notifier = Notifier::new();
        for i in 0..(POPUP_CAPACITY + 1) {
            notifier.popup(NotificationLevel::Info, "title", format!("{}", i));
        }

        let popups = notifier.drain_popups();
        assert_eq!(popups.len(), POPUP_CAPACITY);
        assert_eq!(popups[0].message, "1");
        assert!(notifier.drain_popups().is_empty());
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let notifier = Notifier::new();
        notifier.emit(SceneEvent::KillswitchAbort);

        let mut rx = notifier.subscribe();
        notifier.emit(SceneEvent::ModifierFired { id: 2 });
        assert_eq!(rx.recv().await.unwrap(), SceneEvent::ModifierFired { id: 2 });
    }
}
