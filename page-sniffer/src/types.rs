//! Core types used throughout the page sniffer.
//!
//! This module defines detected resources, the page they were found on,
//! element geometry for hover affordances and the sniffer error type.

use relay_service::config::FILE_TYPE_CATEGORIES;
use relay_service::ResourceRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Opaque handle to the element a resource was found on. Issued by the
/// detector; the page side maps it back to its own node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementKey(pub u64);

/// Category of a resource, by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Audio,
    Image,
    Document,
    Text,
    Archive,
    Executable,
    Other,
}

impl ResourceKind {
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        let category = FILE_TYPE_CATEGORIES
            .iter()
            .find(|(_, exts)| exts.contains(&ext.as_str()))
            .map(|(name, _)| *name);

        match category {
            Some("video") => ResourceKind::Video,
            Some("audio") => ResourceKind::Audio,
            Some("image") => ResourceKind::Image,
            Some("document") => ResourceKind::Document,
            Some("text") => ResourceKind::Text,
            Some("archive") => ResourceKind::Archive,
            Some("executable") => ResourceKind::Executable,
            _ => ResourceKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Audio => "audio",
            ResourceKind::Image => "image",
            ResourceKind::Document => "document",
            ResourceKind::Text => "text",
            ResourceKind::Archive => "archive",
            ResourceKind::Executable => "executable",
            ResourceKind::Other => "other",
        }
    }
}

/// The document being scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    /// Document URL, base for relative references
    pub url: Url,
    /// `document.referrer`, when the page has one
    pub referrer: Option<String>,
    /// User-Agent of the browsing context
    pub user_agent: Option<String>,
}

impl PageContext {
    pub fn new(url: &str) -> Result<Self, SnifferError> {
        let url = Url::parse(url).map_err(|e| SnifferError::InvalidPageUrl(format!("{}: {}", url, e)))?;
        Ok(Self {
            url,
            referrer: None,
            user_agent: None,
        })
    }

    pub fn with_referrer(mut self, referrer: Option<String>) -> Self {
        self.referrer = referrer.filter(|r| !r.is_empty());
        self
    }

    /// Referrer reported for resources: the document referrer, else the page
    pub fn effective_referrer(&self) -> String {
        self.referrer
            .clone()
            .unwrap_or_else(|| self.url.to_string())
    }
}

/// A downloadable resource found on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Absolute, normalized URL; unique per detector
    pub url: String,
    /// Element the resource was first found on
    pub element: ElementKey,
    pub filename: String,
    pub kind: ResourceKind,
    pub page_url: String,
    pub referrer: String,
}

impl Resource {
    /// Request for the relay's `DOWNLOAD_RESOURCE`
    pub fn to_request(&self, user_agent: Option<&str>) -> ResourceRequest {
        ResourceRequest {
            url: self.url.clone(),
            filename: self.filename.clone(),
            referrer: Some(self.referrer.clone()),
            page_url: Some(self.page_url.clone()),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

/// Element position and size in document coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Get the center point of the rect
    pub fn center(&self) -> (i32, i32) {
        (
            self.x + (self.width as i32 / 2),
            self.y + (self.height as i32 / 2),
        )
    }

    /// Check if a point is inside this rect
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && x < self.x + self.width as i32
            && y >= self.y
            && y < self.y + self.height as i32
    }
}

/// Errors that can occur while sniffing
#[derive(Debug, Error)]
pub enum SnifferError {
    #[error("Invalid page URL: {0}")]
    InvalidPageUrl(String),

    #[error("Relay rejected the request: {0}")]
    Rejected(String),

    #[error("Relay closed the connection without answering")]
    NoResponse,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_from_extension() {
        assert_eq!(ResourceKind::from_extension("MP4"), ResourceKind::Video);
        assert_eq!(ResourceKind::from_extension("zip"), ResourceKind::Archive);
        assert_eq!(ResourceKind::from_extension("pdf"), ResourceKind::Document);
        assert_eq!(ResourceKind::from_extension("iso"), ResourceKind::Other);
    }

    #[test]
    fn test_rect_contains() {
        let rect = Rect::new(10, 20, 100, 30);
        assert!(rect.contains(10, 20));
        assert!(rect.contains(109, 49));
        assert!(!rect.contains(110, 20));
        assert!(!rect.contains(50, 50));
        assert_eq!(rect.bottom(), 50);
        assert_eq!(rect.center(), (60, 35));
    }

    #[test]
    fn test_effective_referrer_falls_back_to_page() {
        let page = PageContext::new("https://x/page").unwrap();
        assert_eq!(page.effective_referrer(), "https://x/page");

        let page = page.with_referrer(Some("https://search/".to_string()));
        assert_eq!(page.effective_referrer(), "https://search/");
    }

    #[test]
    fn test_invalid_page_url() {
        assert!(matches!(
            PageContext::new("not a url"),
            Err(SnifferError::InvalidPageUrl(_))
        ));
    }
}
