//! Inter-context message types

use crate::config::{Settings, SettingsOverrides};
use crate::dispatcher::ResourceRequest;
use crate::takeover::{NativeAction, NativeDownload};
use serde::{Deserialize, Serialize};

/// Message received from the page context, the bridge or a settings client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    DownloadResource { resource: ResourceRequest },
    DownloadIntercept { download: NativeDownload },
    DownloadFinished { id: i64 },
    ConnectionStatus,
    Reconnect,
    ToggleSniffing,
    GetSettings,
    UpdateSettings { settings: SettingsOverrides },
    ResetSettings,
}

impl RelayMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DownloadResource { .. } => "DOWNLOAD_RESOURCE",
            Self::DownloadIntercept { .. } => "DOWNLOAD_INTERCEPT",
            Self::DownloadFinished { .. } => "DOWNLOAD_FINISHED",
            Self::ConnectionStatus => "CONNECTION_STATUS",
            Self::Reconnect => "RECONNECT",
            Self::ToggleSniffing => "TOGGLE_SNIFFING",
            Self::GetSettings => "GET_SETTINGS",
            Self::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Self::ResetSettings => "RESET_SETTINGS",
        }
    }
}

/// Response sent back to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_over: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NativeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl RelayResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn error(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            success: true,
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn intercepted(taken_over: bool, actions: Vec<NativeAction>) -> Self {
        Self {
            success: true,
            taken_over: Some(taken_over),
            actions,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_download_resource() {
        let message: RelayMessage = serde_json::from_value(json!({
            "type": "DOWNLOAD_RESOURCE",
            "resource": {
                "url": "http://x/a.zip",
                "filename": "a.zip",
                "referrer": "http://x/",
                "pageUrl": "http://x/page"
            }
        }))
        .unwrap();

        match message {
            RelayMessage::DownloadResource { resource } => {
                assert_eq!(resource.url, "http://x/a.zip");
                assert_eq!(resource.page_url.as_deref(), Some("http://x/page"));
                assert_eq!(resource.user_agent, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_messages() {
        let message: RelayMessage = serde_json::from_str(r#"{"type":"TOGGLE_SNIFFING"}"#).unwrap();
        assert_eq!(message, RelayMessage::ToggleSniffing);
        assert_eq!(message.kind(), "TOGGLE_SNIFFING");

        let message: RelayMessage =
            serde_json::from_str(r#"{"type":"UPDATE_SETTINGS","settings":{"maxThreads":8}}"#).unwrap();
        assert_eq!(
            message,
            RelayMessage::UpdateSettings {
                settings: SettingsOverrides {
                    max_threads: Some(8),
                    ..Default::default()
                }
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<RelayMessage>(r#"{"type":"SELF_DESTRUCT"}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(RelayResponse::ok("Download task added")).unwrap(),
            json!({"success": true, "message": "Download task added"})
        );
        assert_eq!(
            serde_json::to_value(RelayResponse::error("Invalid resource")).unwrap(),
            json!({"success": false, "error": "Invalid resource"})
        );
    }
}
