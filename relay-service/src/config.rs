//! Settings for the relay and the page sniffer.
//!
//! Settings live in a TOML file and are shared with the extension through
//! the inter-context socket. Every reader goes through [`SettingsStore`],
//! which validates writes and notifies subscribers with the changed keys.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default daemon endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:16888/jsonrpc";

/// Default RPC secret
pub const DEFAULT_API_KEY: &str = "GDownload_secret";

/// Default inter-context socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/gdownloader-relay.sock";

/// User-Agent used when the browsing context does not supply one
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Extension categories offered by default
pub const FILE_TYPE_CATEGORIES: &[(&str, &[&str])] = &[
    ("video", &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"]),
    ("audio", &["mp3", "wav", "aac", "ogg", "flac", "m4a"]),
    ("image", &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"]),
    ("document", &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"]),
    ("text", &["txt", "md", "json", "xml", "csv"]),
    ("archive", &["zip", "rar", "7z", "tar", "gz", "xz"]),
    ("executable", &["exe", "msi", "dmg", "pkg", "deb", "rpm"]),
];

/// Thread limits accepted at save time
pub const MIN_THREADS: u32 = 1;
pub const MAX_THREADS: u32 = 32;

/// aria2 refuses `max-connection-per-server` above this
const DAEMON_MAX_CONNECTIONS: u32 = 16;

lazy_static! {
    static ref SERVER_URL: Regex = Regex::new(r"^wss?://\S+$").unwrap();
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid server URL '{0}': must start with ws:// or wss://")]
    InvalidServerUrl(String),
    #[error("Invalid thread count {0}: must be between 1 and 32")]
    InvalidThreadCount(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Effective settings, every field populated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Daemon WebSocket endpoint
    pub server_url: String,
    /// RPC secret, sent as `token:<api_key>`
    pub api_key: String,
    /// Requested connections per server (1-32)
    pub max_threads: u32,
    /// Comma-separated extension list
    pub file_types: String,
    pub enable_sniffing: bool,
    pub take_over_downloads: bool,
    /// Fallback User-Agent
    pub user_agent: String,
    /// Optional Netscape cookie file used for header enrichment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_file: Option<PathBuf>,
    /// Unix socket the relay listens on
    pub socket_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            max_threads: 4,
            file_types: default_file_types(),
            enable_sniffing: true,
            take_over_downloads: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cookies_file: None,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// Partial settings as written by the options page or a settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_types: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_sniffing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_over_downloads: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

/// Individual setting, used to report what changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingKey {
    ServerUrl,
    ApiKey,
    MaxThreads,
    FileTypes,
    EnableSniffing,
    TakeOverDownloads,
    UserAgent,
    CookiesFile,
    SocketPath,
}

fn default_file_types() -> String {
    FILE_TYPE_CATEGORIES
        .iter()
        .flat_map(|(_, exts)| exts.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Apply overrides on top of defaults. Pure; no validation.
pub fn merge(defaults: &Settings, overrides: &SettingsOverrides) -> Settings {
    Settings {
        server_url: overrides
            .server_url
            .clone()
            .unwrap_or_else(|| defaults.server_url.clone()),
        api_key: overrides
            .api_key
            .clone()
            .unwrap_or_else(|| defaults.api_key.clone()),
        max_threads: overrides.max_threads.unwrap_or(defaults.max_threads),
        file_types: overrides
            .file_types
            .clone()
            .unwrap_or_else(|| defaults.file_types.clone()),
        enable_sniffing: overrides.enable_sniffing.unwrap_or(defaults.enable_sniffing),
        take_over_downloads: overrides
            .take_over_downloads
            .unwrap_or(defaults.take_over_downloads),
        user_agent: overrides
            .user_agent
            .clone()
            .unwrap_or_else(|| defaults.user_agent.clone()),
        cookies_file: overrides
            .cookies_file
            .clone()
            .or_else(|| defaults.cookies_file.clone()),
        socket_path: overrides
            .socket_path
            .clone()
            .unwrap_or_else(|| defaults.socket_path.clone()),
    }
}

impl Settings {
    /// Check the fields the options page validates at save time
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !SERVER_URL.is_match(&self.server_url) {
            return Err(SettingsError::InvalidServerUrl(self.server_url.clone()));
        }
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.max_threads) {
            return Err(SettingsError::InvalidThreadCount(self.max_threads));
        }
        Ok(())
    }

    /// Normalized extension list: lowercase, no leading dot, no blanks
    pub fn extensions(&self) -> Vec<String> {
        parse_file_types(&self.file_types)
    }

    /// Parallelism sent to the daemon, clamped to what it accepts
    pub fn connections_per_server(&self) -> u32 {
        self.max_threads.clamp(MIN_THREADS, DAEMON_MAX_CONNECTIONS)
    }

    /// Keys whose values differ between `self` and `other`
    pub fn diff(&self, other: &Settings) -> Vec<SettingKey> {
        let mut changed = Vec::new();
        if self.server_url != other.server_url {
            changed.push(SettingKey::ServerUrl);
        }
        if self.api_key != other.api_key {
            changed.push(SettingKey::ApiKey);
        }
        if self.max_threads != other.max_threads {
            changed.push(SettingKey::MaxThreads);
        }
        if self.file_types != other.file_types {
            changed.push(SettingKey::FileTypes);
        }
        if self.enable_sniffing != other.enable_sniffing {
            changed.push(SettingKey::EnableSniffing);
        }
        if self.take_over_downloads != other.take_over_downloads {
            changed.push(SettingKey::TakeOverDownloads);
        }
        if self.user_agent != other.user_agent {
            changed.push(SettingKey::UserAgent);
        }
        if self.cookies_file != other.cookies_file {
            changed.push(SettingKey::CookiesFile);
        }
        if self.socket_path != other.socket_path {
            changed.push(SettingKey::SocketPath);
        }
        changed
    }

    /// Load settings from the default path
    pub fn load() -> Self {
        Self::load_from_path(&Self::default_config_path())
    }

    /// Load settings from a file, falling back to defaults on any problem
    pub fn load_from_path(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => {
                info!("No settings file found at {:?}, using defaults", path);
                return Self::default();
            }
        };

        let overrides: SettingsOverrides = match toml::from_str(&contents) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!("Failed to parse settings file: {}, using defaults", e);
                return Self::default();
            }
        };

        let settings = merge(&Self::default(), &overrides);
        match settings.validate() {
            Ok(()) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Invalid settings in {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Get the default settings file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gdownloader")
            .join("settings.toml")
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Split a comma-separated extension list
pub fn parse_file_types(file_types: &str) -> Vec<String> {
    file_types
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Settings published to subscribers
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
    pub settings: Settings,
    /// Keys changed by the write that produced this update
    pub changed: Vec<SettingKey>,
}

/// Process-wide settings with change notification
pub struct SettingsStore {
    tx: watch::Sender<SettingsUpdate>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// In-memory store, nothing persisted
    pub fn new(settings: Settings) -> Self {
        let (tx, _rx) = watch::channel(SettingsUpdate {
            settings,
            changed: Vec::new(),
        });
        Self {
            tx,
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Store backed by a settings file; writes are saved to it
    pub fn open(path: PathBuf) -> Self {
        let settings = Settings::load_from_path(&path);
        let mut store = Self::new(settings);
        store.path = Some(path);
        store
    }

    /// Current settings
    pub fn get(&self) -> Settings {
        self.tx.borrow().settings.clone()
    }

    /// Apply overrides. Invalid results are rejected and the last good
    /// settings stay active.
    pub fn set(&self, overrides: &SettingsOverrides) -> Result<Vec<SettingKey>, SettingsError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.get();
        let next = merge(&current, overrides);
        next.validate()?;
        self.publish(current, next)
    }

    /// Restore defaults, keeping where the relay listens
    pub fn reset(&self) -> Result<Vec<SettingKey>, SettingsError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.get();
        let next = Settings {
            socket_path: current.socket_path.clone(),
            ..Settings::default()
        };
        self.publish(current, next)
    }

    /// Subscribe to settings changes
    pub fn subscribe(&self) -> watch::Receiver<SettingsUpdate> {
        self.tx.subscribe()
    }

    fn publish(&self, current: Settings, next: Settings) -> Result<Vec<SettingKey>, SettingsError> {
        let changed = current.diff(&next);
        if changed.is_empty() {
            return Ok(changed);
        }

        if let Some(path) = &self.path {
            next.save_to_path(path)?;
        }

        info!("Settings updated: {:?}", changed);
        self.tx.send_replace(SettingsUpdate {
            settings: next,
            changed: changed.clone(),
        });
        Ok(changed)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
