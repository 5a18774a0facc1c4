//! Resource detection over HTML subtrees.
//!
//! The detector walks a subtree, collects every URL-bearing attribute that
//! could point at a downloadable file, normalizes each against the page URL
//! and accepts the ones whose path ends in a configured extension. Every
//! URL is accepted at most once per detector.

use crate::types::{ElementKey, PageContext, Resource, ResourceKind};
use lazy_static::lazy_static;
use regex::Regex;
use relay_service::Settings;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};
use url::Url;

/// Tags whose `src` is a candidate
const MEDIA_TAGS: &[&str] = &["video", "audio", "source", "img", "embed", "track"];

/// Attributes used by lazy loaders to hold the real URL
const LAZY_ATTRIBUTES: &[&str] = &[
    "data-src",
    "data-original",
    "data-lazy-src",
    "data-url",
    "data-href",
    "data-file",
    "data-download",
];

/// Candidate lists in `srcset` syntax
const SRCSET_ATTRIBUTES: &[&str] = &["srcset", "data-srcset"];

/// Class fragments marking download or player widgets
const CLASS_HINTS: &[&str] = &["download", "video", "player", "media", "attachment", "file"];

/// Path fragments that mark navigation pages rather than files
const EXCLUDED_KEYWORDS: &[&str] = &[
    "about", "policy", "contact", "help", "support", "login", "signin", "signup", "register",
];

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Attribute a page shim can set to choose the element's key
pub const NODE_KEY_ATTRIBUTE: &str = "data-gdl-node";

lazy_static! {
    static ref CANDIDATES: Selector = Selector::parse(
        "a[href], a[download], video[src], audio[src], source[src], img[src], embed[src], \
         track[src], [data-src], [data-original], [data-lazy-src], [data-url], [data-href], \
         [data-file], [data-download], [srcset], [data-srcset], [class]"
    )
    .unwrap();
    static ref SRCSET_ENTRY: Regex = Regex::new(r"^\s*(\S+)").unwrap();
}

/// What the detector accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    pub enabled: bool,
    /// Lowercase extensions without the dot
    pub extensions: Vec<String>,
}

impl DetectorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.enable_sniffing,
            extensions: settings.extensions(),
        }
    }
}

/// Result of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Resources accepted for the first time
    pub added: Vec<Resource>,
    /// Every element matched to an accepted URL, duplicates included
    pub matches: Vec<(ElementKey, String)>,
}

pub struct ResourceDetector {
    config: DetectorConfig,
    page: PageContext,
    accepted: HashSet<String>,
    resources: Vec<Resource>,
    element_urls: HashMap<ElementKey, String>,
    next_key: u64,
}

impl ResourceDetector {
    pub fn new(config: DetectorConfig, page: PageContext) -> Self {
        debug!(
            "Detector for {} (enabled: {}, {} extensions)",
            page.url,
            config.enabled,
            config.extensions.len()
        );
        Self {
            config,
            page,
            accepted: HashSet::new(),
            resources: Vec::new(),
            element_urls: HashMap::new(),
            next_key: 1 << 32,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    /// Accepted resources in discovery order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn contains(&self, url: &str) -> bool {
        self.accepted.contains(url)
    }

    pub fn resource(&self, url: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.url == url)
    }

    /// URL an element was matched to
    pub fn url_for(&self, element: ElementKey) -> Option<&str> {
        self.element_urls.get(&element).map(String::as_str)
    }

    /// Scan a whole document
    pub fn scan_document(&mut self, html: &str) -> ScanResult {
        let document = Html::parse_document(html);
        self.scan(document.root_element())
    }

    /// Scan a fragment inserted into the page
    pub fn scan_fragment(&mut self, html: &str) -> ScanResult {
        let fragment = Html::parse_fragment(html);
        self.scan(fragment.root_element())
    }

    /// Scan `root` and everything below it
    pub fn scan(&mut self, root: ElementRef<'_>) -> ScanResult {
        let mut result = ScanResult::default();
        if !self.config.enabled {
            trace!("Sniffing disabled, skipping scan");
            return result;
        }

        for element in root.descendants().filter_map(ElementRef::wrap) {
            if !CANDIDATES.matches(&element) {
                continue;
            }

            let candidates = candidate_urls(&element);
            if candidates.is_empty() {
                continue;
            }

            let key = self.element_key(&element);
            let filename_hint = download_attribute(&element);
            for raw in candidates {
                let Some(url) = self.normalize(&raw) else {
                    continue;
                };
                if !self.accepted.contains(url.as_str()) && !self.is_valid_resource(&url) {
                    continue;
                }

                if let Some(resource) = self.accept(&url, key, filename_hint.as_deref()) {
                    result.added.push(resource);
                }
                self.element_urls.insert(key, url.to_string());
                result.matches.push((key, url.to_string()));
            }
        }

        if !result.added.is_empty() {
            debug!("Scan accepted {} new resources", result.added.len());
        }
        result
    }

    /// Offer a single raw URL, as found on `element`
    pub fn add_resource(&mut self, raw: &str, element: ElementKey) -> Option<Resource> {
        if !self.config.enabled {
            return None;
        }
        let url = self.normalize(raw)?;
        if !self.is_valid_resource(&url) {
            return None;
        }
        let resource = self.accept(&url, element, None);
        self.element_urls.insert(element, url.to_string());
        resource
    }

    fn accept(&mut self, url: &Url, element: ElementKey, filename_hint: Option<&str>) -> Option<Resource> {
        if !self.accepted.insert(url.to_string()) {
            trace!("Already accepted {}", url);
            return None;
        }

        let resource = Resource {
            url: url.to_string(),
            element,
            filename: filename_hint
                .map(str::to_string)
                .unwrap_or_else(|| filename_from_url(url)),
            kind: ResourceKind::from_extension(&extension_of(url).unwrap_or_default()),
            page_url: self.page.url.to_string(),
            referrer: self.page.effective_referrer(),
        };
        debug!("Accepted {} ({})", resource.url, resource.kind.as_str());
        self.resources.push(resource.clone());
        Some(resource)
    }

    /// Resolve against the page URL, drop the fragment, keep web schemes
    pub fn normalize(&self, raw: &str) -> Option<Url> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return None;
        }

        let mut url = self.page.url.join(raw).ok()?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return None;
        }
        url.set_fragment(None);
        Some(url)
    }

    /// Extension and exclusion checks on a normalized URL
    pub fn is_valid_resource(&self, url: &Url) -> bool {
        let path = url.path().to_lowercase();

        let has_extension = self
            .config
            .extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)));
        if !has_extension {
            return false;
        }

        !EXCLUDED_KEYWORDS.iter().any(|keyword| path.contains(keyword))
    }

    fn element_key(&mut self, element: &ElementRef<'_>) -> ElementKey {
        if let Some(key) = element
            .value()
            .attr(NODE_KEY_ATTRIBUTE)
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return ElementKey(key);
        }
        let key = ElementKey(self.next_key);
        self.next_key += 1;
        key
    }
}

/// Raw URL candidates carried by one element
fn candidate_urls(element: &ElementRef<'_>) -> Vec<String> {
    let value = element.value();
    let name = value.name();
    let mut urls: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let raw = raw.trim();
        if !raw.is_empty() && !urls.iter().any(|u| u == raw) {
            urls.push(raw.to_string());
        }
    };

    if name == "a" {
        if let Some(href) = value.attr("href") {
            push(href);
        }
    }

    if MEDIA_TAGS.contains(&name) {
        if let Some(src) = value.attr("src") {
            push(src);
        }
    }

    for attr in LAZY_ATTRIBUTES {
        if let Some(raw) = value.attr(attr) {
            push(raw);
        }
    }

    for attr in SRCSET_ATTRIBUTES {
        if let Some(list) = value.attr(attr) {
            for entry in parse_srcset(list) {
                push(&entry);
            }
        }
    }

    let hinted = value
        .classes()
        .any(|class| {
            let class = class.to_lowercase();
            CLASS_HINTS.iter().any(|hint| class.contains(hint))
        });
    if hinted {
        for (attr, raw) in value.attrs() {
            if attr.starts_with("data-") && attr != NODE_KEY_ATTRIBUTE && looks_like_url(raw) {
                push(raw);
            }
        }
    }

    urls
}

/// URLs from a `srcset` list, descriptors dropped
pub fn parse_srcset(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|entry| SRCSET_ENTRY.captures(entry))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn looks_like_url(raw: &str) -> bool {
    let raw = raw.trim();
    !raw.is_empty() && !raw.contains(char::is_whitespace) && (raw.contains('/') || raw.contains('.'))
}

/// Non-empty `download` attribute of an anchor, reduced to a file name
fn download_attribute(element: &ElementRef<'_>) -> Option<String> {
    if element.value().name() != "a" {
        return None;
    }
    element
        .value()
        .attr("download")
        .map(|name| name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name).trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Last path segment, percent-decoded
pub fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn extension_of(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_lowercase())
}
