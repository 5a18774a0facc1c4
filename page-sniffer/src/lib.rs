//! Page Sniffer - download detection for a browsing context
//!
//! This crate finds downloadable resources in page markup and offers them
//! to the relay:
//!
//! - **Detection**: URL-bearing attributes are collected, normalized against
//!   the page and filtered by the configured extensions
//! - **Affordances**: a download button per resource, shown on hover
//! - **Dispatch**: clicked resources go to the relay over its Unix socket
//!
//! # Architecture
//!
//! A [`SnifferSession`] owns one page. The page side feeds it
//! [`PageEvent`]s and renders the [`SnifferOutput`]s it returns. Settings
//! changes that affect what is accepted rebuild the detector.

pub mod affordance;
pub mod client;
pub mod detector;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use affordance::{AffordanceManager, ButtonChange};
pub use client::{RelayClient, ResourceSink};
pub use detector::{filename_from_url, parse_srcset, DetectorConfig, ResourceDetector, ScanResult};
pub use session::{PageEvent, SnifferOutput, SnifferSession};
pub use types::{ElementKey, PageContext, Rect, Resource, ResourceKind, SnifferError};
