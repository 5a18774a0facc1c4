//! Turns resource requests into daemon downloads
//!
//! A dispatch validates the resource, makes sure the connection is open,
//! gathers cookies and headers and writes one `aria2.addUri` request. The
//! dispatcher also relays daemon lifecycle notifications to the notifier.

use crate::config::SettingsStore;
use crate::connection::ConnectionManager;
use crate::cookies::{merge_cookies, Cookie, CookieStore};
use crate::error::{RelayError, Result};
use crate::notify::{Notification, Notifier};
use crate::rpc::{self, AddUriOptions, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// A resource to hand to the daemon, as sent by the page context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    /// User-Agent of the browsing context, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ResourceRequest {
    pub fn new(url: &str, filename: &str) -> Self {
        Self {
            url: url.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }
}

/// What was sent for a successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub id: RequestId,
    pub url: String,
    pub filename: String,
}

pub struct Dispatcher {
    connection: Arc<ConnectionManager>,
    settings: Arc<SettingsStore>,
    cookies: Arc<dyn CookieStore>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        settings: Arc<SettingsStore>,
        cookies: Arc<dyn CookieStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            connection,
            settings,
            cookies,
            notifier,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Send one resource to the daemon.
    ///
    /// Succeeds once the request is written; the daemon's reply is not
    /// awaited. Fails with `InvalidResource` before touching the connection.
    pub async fn dispatch(&self, resource: &ResourceRequest) -> Result<DispatchReceipt> {
        let url = validate_url(&resource.url)?;

        self.connection.connect().await?;

        let settings = self.settings.get();
        let header = self.headers(&url, resource, &settings.user_agent).await;
        let options = AddUriOptions::new(settings.connections_per_server(), header, &resource.filename);

        let id = self.connection.next_id();
        let request = rpc::add_uri(id.clone(), &settings.api_key, url.as_str(), &options)?;
        self.connection.send(&request)?;

        info!("Dispatched {} as '{}'", url, resource.filename);
        Ok(DispatchReceipt {
            id,
            url: url.to_string(),
            filename: resource.filename.clone(),
        })
    }

    async fn headers(&self, url: &Url, resource: &ResourceRequest, fallback_agent: &str) -> Vec<String> {
        let mut header = Vec::with_capacity(3);

        let page_url = resource
            .page_url
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| Url::parse(p).ok());

        let cookie = self.cookie_header(url.clone(), page_url).await;
        if !cookie.is_empty() {
            header.push(format!("Cookie: {}", cookie));
        }

        let agent = resource
            .user_agent
            .as_deref()
            .filter(|ua| !ua.is_empty())
            .unwrap_or(fallback_agent);
        header.push(format!("User-Agent: {}", agent));

        let referer = resource
            .page_url
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| resource.referrer.as_deref().filter(|r| !r.is_empty()));
        if let Some(referer) = referer {
            header.push(format!("Referer: {}", referer));
        }

        header
    }

    /// Cookie stores may read files, so lookups run on the blocking pool
    async fn cookie_header(&self, url: Url, page_url: Option<Url>) -> String {
        let cookies = Arc::clone(&self.cookies);
        let lookup = tokio::task::spawn_blocking(move || {
            let url_scoped = lookup_cookies(cookies.as_ref(), &url);
            let page_scoped = page_url
                .map(|page| lookup_cookies(cookies.as_ref(), &page))
                .unwrap_or_default();
            merge_cookies(&url_scoped, &page_scoped)
        });

        match lookup.await {
            Ok(header) => header,
            Err(e) => {
                warn!("Cookie lookup task failed: {}, sending without cookies", e);
                String::new()
            }
        }
    }

    /// Forward daemon notifications to the notifier until the connection
    /// manager goes away
    pub fn spawn_event_relay(&self) -> JoinHandle<()> {
        let mut events = self.connection.subscribe_events();
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!("Relaying {:?} for gid {:?}", event.kind, event.gid);
                        notifier.notify(&Notification::for_event(event.kind));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event relay lagged, skipped {} notifications", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn lookup_cookies(store: &dyn CookieStore, url: &Url) -> Vec<Cookie> {
    match store.cookies_for(url) {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!("{}, sending without cookies", e);
            Vec::new()
        }
    }
}

/// Absolute URL or `InvalidResource`
pub fn validate_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RelayError::InvalidResource("missing URL".into()));
    }

    let url = Url::parse(raw).map_err(|e| RelayError::InvalidResource(format!("{}: {}", raw, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(RelayError::InvalidResource(format!("{} is not an absolute URL", raw)));
    }
    Ok(url)
}
