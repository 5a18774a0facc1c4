//! GDownloader relay library
//!
//! Background side of the downloader: settings, the persistent daemon
//! connection, the download dispatcher, native-download takeover and the
//! inter-context message server.

pub mod config;
pub mod connection;
pub mod cookies;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod notify;
pub mod rpc;
pub mod server;
pub mod takeover;
pub mod transport;

pub use config::{Settings, SettingsOverrides, SettingsStore};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{Dispatcher, ResourceRequest};
pub use error::{RelayError, Result};
pub use message::{RelayMessage, RelayResponse};
pub use server::RelayServer;
