//! Takeover of browser-native downloads
//!
//! When enabled, a download the browser is about to start is sent to the
//! daemon instead. The native download is cancelled and erased only after
//! the daemon request went out; any failure lets the browser continue.

use crate::config::SettingsStore;
use crate::dispatcher::{Dispatcher, ResourceRequest};
use crate::error::{RelayError, Result};
use crate::notify::Notification;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before erasing the record of a finished native download
pub const ERASE_DELAY: Duration = Duration::from_millis(500);

/// Download the browser is about to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeDownload {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

/// Browser download manager operations
#[async_trait::async_trait]
pub trait NativeDownloads: Send + Sync {
    async fn cancel(&self, id: i64) -> Result<()>;
    async fn erase(&self, id: i64) -> Result<()>;
}

/// Operation for the browser side to carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum NativeAction {
    Cancel { id: i64 },
    Erase { id: i64 },
}

/// Collects operations so they can be returned to the extension, which
/// owns the real download manager
#[derive(Debug, Default)]
pub struct ActionRecorder {
    actions: Mutex<Vec<NativeAction>>,
}

impl ActionRecorder {
    pub fn into_actions(self) -> Vec<NativeAction> {
        self.actions.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, action: NativeAction) {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }
}

#[async_trait::async_trait]
impl NativeDownloads for ActionRecorder {
    async fn cancel(&self, id: i64) -> Result<()> {
        self.record(NativeAction::Cancel { id });
        Ok(())
    }

    async fn erase(&self, id: i64) -> Result<()> {
        self.record(NativeAction::Erase { id });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
    /// Takeover is off; the browser keeps the download
    Declined,
    /// Sent to the daemon and the native download cancelled
    TakenOver,
    /// Sending failed; the browser keeps the download
    FailedOpen(String),
}

pub struct Takeover {
    dispatcher: Arc<Dispatcher>,
    settings: Arc<SettingsStore>,
    erase_delay: Duration,
}

impl Takeover {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: Arc<SettingsStore>) -> Self {
        Self {
            dispatcher,
            settings,
            erase_delay: ERASE_DELAY,
        }
    }

    /// Offer a native download for takeover
    pub async fn intercept(
        &self,
        download: &NativeDownload,
        downloads: &dyn NativeDownloads,
    ) -> InterceptOutcome {
        if !self.settings.get().take_over_downloads {
            return InterceptOutcome::Declined;
        }

        info!("Taking over native download {}: {}", download.id, download.url);

        // Cookies scoped to the download URL only; Referer from the download
        let resource = ResourceRequest {
            referrer: download.referrer.clone(),
            ..ResourceRequest::new(&download.url, &download.filename)
        };

        if let Err(e) = self.dispatcher.dispatch(&resource).await {
            warn!("Takeover of {} failed, browser keeps it: {}", download.id, e);
            self.dispatcher
                .notifier()
                .notify(&Notification::error("Error", &e.to_string()));
            return InterceptOutcome::FailedOpen(e.to_string());
        }

        self.dispatcher
            .notifier()
            .notify(&Notification::added(&download.filename));

        if let Err(e) = downloads.cancel(download.id).await {
            let e = RelayError::NativeDownloadInterceptFailed(e.to_string());
            warn!("Download {}: {}", download.id, e);
        } else if let Err(e) = downloads.erase(download.id).await {
            debug!("Could not erase download {}: {}", download.id, e);
        }

        InterceptOutcome::TakenOver
    }

    /// A native download finished. With takeover on, its record is erased
    /// after a short delay. Returns whether an erase was issued.
    pub async fn finished(&self, id: i64, downloads: &dyn NativeDownloads) -> bool {
        if !self.settings.get().take_over_downloads {
            return false;
        }

        tokio::time::sleep(self.erase_delay).await;
        match downloads.erase(id).await {
            Ok(()) => {
                debug!("Erased finished download {}", id);
                true
            }
            Err(e) => {
                warn!("Failed to erase download {}: {}", id, e);
                false
            }
        }
    }
}
