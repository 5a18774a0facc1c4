//! User-facing notifications

use crate::rpc::DaemonEventKind;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn info(title: &str, message: &str) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    pub fn error(title: &str, message: &str) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.to_string(),
            message: message.to_string(),
        }
    }

    /// Generic notification for a daemon lifecycle event. Notifications
    /// carry no per-download detail.
    pub fn for_event(kind: DaemonEventKind) -> Self {
        match kind {
            DaemonEventKind::Started => Self::info("Download started", "The download has started"),
            DaemonEventKind::Paused => Self::info("Download paused", "The download was paused"),
            DaemonEventKind::Stopped => Self::info("Download stopped", "The download was stopped"),
            DaemonEventKind::Completed | DaemonEventKind::BtCompleted => {
                Self::info("Download complete", "The download has finished")
            }
            DaemonEventKind::Errored => {
                Self::error("Download error", "The download failed")
            }
        }
    }

    pub fn added(filename: &str) -> Self {
        Self::info("Download started", &format!("Added to aria2: {}", filename))
    }
}

/// Shows notifications to the user
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.level {
            NotificationLevel::Info => {
                info!("[notify] {}: {}", notification.title, notification.message)
            }
            NotificationLevel::Error => {
                warn!("[notify] {}: {}", notification.title, notification.message)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every notification for assertions
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub seen: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn titles(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|n| n.title.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.seen.lock().unwrap().push(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_notifications() {
        assert_eq!(
            Notification::for_event(DaemonEventKind::Completed).title,
            "Download complete"
        );
        assert_eq!(
            Notification::for_event(DaemonEventKind::Errored).level,
            NotificationLevel::Error
        );
    }
}
