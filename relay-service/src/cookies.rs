//! Cookie lookup for download headers
//!
//! Cookies come from a Netscape `cookies.txt` export (the format written by
//! browser export add-ons and read by curl/wget/aria2). The file is re-read
//! on every lookup so a fresh export applies without restarting the relay.

use crate::config::SettingsStore;
use crate::error::{RelayError, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Source of cookies applicable to a URL
pub trait CookieStore: Send + Sync {
    fn cookies_for(&self, url: &Url) -> Result<Vec<Cookie>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// `None` for session cookies
    pub expires: Option<DateTime<Utc>>,
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(domain: &str, name: &str, value: &str) -> Self {
        Self {
            domain: domain.trim_start_matches('.').to_lowercase(),
            include_subdomains: true,
            path: "/".to_string(),
            secure: false,
            expires: None,
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Whether a request to `url` at `now` would carry this cookie
    pub fn matches(&self, url: &Url, now: DateTime<Utc>) -> bool {
        if self.expires.is_some_and(|expires| expires <= now) {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        let domain_ok = host == self.domain
            || (self.include_subdomains && host.ends_with(&format!(".{}", self.domain)));
        if !domain_ok {
            return false;
        }

        path_matches(&self.path, url.path())
    }
}

/// RFC 6265 path-match
fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// Parse the contents of a Netscape cookie file.
///
/// Blank lines and comments are skipped; `#HttpOnly_` prefixed lines are
/// kept. Lines without the seven tab-separated fields are ignored.
pub fn parse_netscape(contents: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();

    for line in contents.lines() {
        let line = line.trim_end_matches('\r');
        let line = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => rest,
            None if line.starts_with('#') || line.trim().is_empty() => continue,
            None => line,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            debug!("Skipping cookie line with {} fields", fields.len());
            continue;
        }

        let expires = match fields[4].trim().parse::<i64>() {
            Ok(0) | Err(_) => None,
            Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
        };

        cookies.push(Cookie {
            domain: fields[0].trim_start_matches('.').to_lowercase(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        });
    }

    cookies
}

/// Cookies from a single `cookies.txt`
pub struct NetscapeCookieFile {
    cookies: Vec<Cookie>,
}

impl NetscapeCookieFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::CookieLookupFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            cookies: parse_netscape(&contents),
        })
    }

    pub fn from_cookies(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }
}

impl CookieStore for NetscapeCookieFile {
    fn cookies_for(&self, url: &Url) -> Result<Vec<Cookie>> {
        let now = Utc::now();
        Ok(self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(url, now))
            .cloned()
            .collect())
    }
}

/// Follows `Settings.cookies_file`; no file configured means no cookies
pub struct ConfiguredCookieFile {
    settings: Arc<SettingsStore>,
}

impl ConfiguredCookieFile {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }
}

impl CookieStore for ConfiguredCookieFile {
    fn cookies_for(&self, url: &Url) -> Result<Vec<Cookie>> {
        match self.settings.get().cookies_file {
            Some(path) => NetscapeCookieFile::load(&path)?.cookies_for(url),
            None => Ok(Vec::new()),
        }
    }
}

/// Build a `Cookie` header value. On a name collision the cookie scoped to
/// the download URL wins over the one scoped to the page.
pub fn merge_cookies(url_scoped: &[Cookie], page_scoped: &[Cookie]) -> String {
    let mut merged: Vec<&Cookie> = Vec::with_capacity(url_scoped.len() + page_scoped.len());
    for cookie in url_scoped.iter().chain(page_scoped) {
        if !merged.iter().any(|c| c.name == cookie.name) {
            merged.push(cookie);
        }
    }

    merged
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
# comment line\n\
\n\
.example.com\tTRUE\t/\tFALSE\t0\tsession\tabc\n\
files.example.com\tFALSE\t/dl\tTRUE\t4102444800\ttoken\txyz\n\
#HttpOnly_.example.com\tTRUE\t/\tFALSE\t0\tsid\t42\n\
broken line\n";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_netscape() {
        let cookies = parse_netscape(SAMPLE);
        assert_eq!(cookies.len(), 3);

        assert_eq!(cookies[0].domain, "example.com");
        assert!(cookies[0].include_subdomains);
        assert_eq!(cookies[0].expires, None);

        assert_eq!(cookies[1].path, "/dl");
        assert!(cookies[1].secure);
        assert!(cookies[1].expires.is_some());

        assert_eq!(cookies[2].name, "sid");
    }

    #[test]
    fn test_domain_matching() {
        let now = Utc::now();
        let cookie = Cookie::new(".example.com", "a", "1");
        assert!(cookie.matches(&url("http://example.com/x"), now));
        assert!(cookie.matches(&url("http://cdn.example.com/x"), now));
        assert!(!cookie.matches(&url("http://badexample.com/x"), now));

        let host_only = Cookie {
            include_subdomains: false,
            ..cookie
        };
        assert!(!host_only.matches(&url("http://cdn.example.com/x"), now));
    }

    #[test]
    fn test_path_secure_and_expiry() {
        let now = Utc::now();
        let cookies = parse_netscape(SAMPLE);
        let token = &cookies[1];

        assert!(token.matches(&url("https://files.example.com/dl/a.zip"), now));
        assert!(!token.matches(&url("http://files.example.com/dl/a.zip"), now));
        assert!(!token.matches(&url("https://files.example.com/dlx"), now));

        let expired = Cookie {
            expires: Some(now - Duration::seconds(1)),
            ..Cookie::new("example.com", "old", "1")
        };
        assert!(!expired.matches(&url("http://example.com/"), now));
    }

    #[test]
    fn test_merge_prefers_url_scoped() {
        let url_scoped = vec![Cookie::new("cdn.x", "sid", "download")];
        let page_scoped = vec![
            Cookie::new("x", "sid", "page"),
            Cookie::new("x", "lang", "en"),
        ];

        assert_eq!(merge_cookies(&url_scoped, &page_scoped), "sid=download; lang=en");
        assert_eq!(merge_cookies(&[], &[]), "");
    }

    #[test]
    fn test_load_file_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = NetscapeCookieFile::load(&path).unwrap();
        let names: Vec<String> = store
            .cookies_for(&url("http://www.example.com/page"))
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["session".to_string(), "sid".to_string()]);
    }

    #[test]
    fn test_missing_file_is_lookup_failure() {
        let result = NetscapeCookieFile::load(Path::new("/nonexistent/cookies.txt"));
        assert!(matches!(result, Err(RelayError::CookieLookupFailed(_))));
    }

    #[test]
    fn test_configured_without_file_is_empty() {
        let store = ConfiguredCookieFile::new(Arc::new(SettingsStore::default()));
        assert!(store.cookies_for(&url("http://x/a.zip")).unwrap().is_empty());
    }
}
