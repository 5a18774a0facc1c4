//! Content-context session: one page, its detector and its buttons.
//!
//! The page side feeds [`PageEvent`]s (document load, inserted subtrees,
//! hover and click activity, settings changes) and renders the
//! [`SnifferOutput`]s it gets back. Only inserted subtrees are scanned after
//! the initial load. Changing `enableSniffing` or `fileTypes` rebuilds the
//! detector and rescans the markup seen so far. Inserted markup is retained
//! up to [`MAX_RETAINED_MARKUP`] bytes; the oldest subtrees are dropped
//! first, so after a rebuild on a very long page only the most recent
//! insertions are rescanned.

use crate::affordance::{AffordanceManager, ButtonChange};
use crate::client::ResourceSink;
use crate::detector::{DetectorConfig, ResourceDetector, ScanResult};
use crate::types::{ElementKey, PageContext, Rect, Resource};
use relay_service::Settings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bytes of inserted markup kept for rescans
pub const MAX_RETAINED_MARKUP: usize = 4 * 1024 * 1024;

/// Activity reported by the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Load {
        url: String,
        #[serde(default)]
        referrer: Option<String>,
        #[serde(default)]
        user_agent: Option<String>,
        html: String,
    },
    SubtreeInserted {
        html: String,
    },
    HoverEnter {
        element: ElementKey,
        rect: Rect,
    },
    HoverLeave {
        element: ElementKey,
    },
    Pointer {
        x: i32,
        y: i32,
    },
    ButtonLeave {
        url: String,
    },
    ButtonClick {
        url: String,
    },
    Settings {
        settings: Settings,
    },
}

/// Instructions and reports for the page side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SnifferOutput {
    Detected { resource: Resource },
    Matched { element: ElementKey, url: String },
    ShowButton { url: String, bounds: Rect },
    HideButton { url: String },
    Rebuilt { enabled: bool },
    Dispatched { url: String, success: bool, message: String },
}

impl From<ButtonChange> for SnifferOutput {
    fn from(change: ButtonChange) -> Self {
        match change {
            ButtonChange::Show { url, bounds } => SnifferOutput::ShowButton { url, bounds },
            ButtonChange::Hide { url } => SnifferOutput::HideButton { url },
        }
    }
}

/// Outcome of handling one event
#[derive(Debug, Default)]
pub struct Handled {
    pub outputs: Vec<SnifferOutput>,
    /// Resource whose button was clicked
    pub download: Option<Resource>,
}

pub struct SnifferSession {
    settings: Settings,
    detector: Option<ResourceDetector>,
    affordances: AffordanceManager,
    document: Option<String>,
    inserted: VecDeque<String>,
    inserted_bytes: usize,
    markup_limit: usize,
    pointer: Option<(i32, i32)>,
}

impl SnifferSession {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            detector: None,
            affordances: AffordanceManager::new(),
            document: None,
            inserted: VecDeque::new(),
            inserted_bytes: 0,
            markup_limit: MAX_RETAINED_MARKUP,
            pointer: None,
        }
    }

    /// Override how much inserted markup is kept for rescans
    pub fn with_markup_limit(mut self, limit: usize) -> Self {
        self.markup_limit = limit;
        self
    }

    /// Bytes of inserted markup currently kept
    pub fn retained_markup(&self) -> usize {
        self.inserted_bytes
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn detector(&self) -> Option<&ResourceDetector> {
        self.detector.as_ref()
    }

    pub fn affordances(&self) -> &AffordanceManager {
        &self.affordances
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.detector
            .as_ref()
            .and_then(|d| d.page().user_agent.as_deref())
    }

    pub fn handle(&mut self, event: PageEvent, now: Instant) -> Handled {
        let mut handled = Handled::default();

        match event {
            PageEvent::Load {
                url,
                referrer,
                user_agent,
                html,
            } => match PageContext::new(&url) {
                Ok(page) => {
                    let mut page = page.with_referrer(referrer);
                    page.user_agent = user_agent;
                    info!("Page loaded: {}", page.url);

                    handled.outputs.extend(self.affordances.clear().into_iter().map(Into::into));
                    self.inserted.clear();
                    self.inserted_bytes = 0;
                    let mut detector = ResourceDetector::new(DetectorConfig::from_settings(&self.settings), page);
                    let result = detector.scan_document(&html);
                    self.detector = Some(detector);
                    self.document = Some(html);
                    push_scan(&mut handled.outputs, result);
                }
                Err(e) => warn!("Ignoring page load: {}", e),
            },

            PageEvent::SubtreeInserted { html } => match self.detector.as_mut() {
                Some(detector) => {
                    let result = detector.scan_fragment(&html);
                    self.retain_inserted(html);
                    push_scan(&mut handled.outputs, result);
                }
                None => debug!("Subtree inserted before page load, ignoring"),
            },

            PageEvent::HoverEnter { element, rect } => {
                if let Some(url) = self.url_for(element) {
                    let change = self.affordances.hover_enter(&url, rect);
                    handled.outputs.push(change.into());
                }
            }

            PageEvent::HoverLeave { element } => {
                if let Some(url) = self.url_for(element) {
                    self.affordances.hover_leave(&url, now);
                }
            }

            PageEvent::Pointer { x, y } => {
                self.pointer = Some((x, y));
            }

            PageEvent::ButtonLeave { url } => {
                if let Some(change) = self.affordances.button_leave(&url) {
                    handled.outputs.push(change.into());
                }
            }

            PageEvent::ButtonClick { url } => {
                if self.affordances.click(&url) {
                    handled.outputs.push(SnifferOutput::HideButton { url: url.clone() });
                }
                handled.download = self
                    .detector
                    .as_ref()
                    .and_then(|d| d.resource(&url))
                    .cloned();
                if handled.download.is_none() {
                    warn!("Click for unknown resource {}", url);
                }
            }

            PageEvent::Settings { settings } => {
                handled.outputs.extend(self.apply_settings(settings));
            }
        }

        handled
    }

    /// Adopt new settings, rebuilding the detector when what it accepts
    /// has changed
    pub fn apply_settings(&mut self, settings: Settings) -> Vec<SnifferOutput> {
        let rebuild = settings.enable_sniffing != self.settings.enable_sniffing
            || settings.file_types != self.settings.file_types;
        self.settings = settings;

        if !rebuild {
            return Vec::new();
        }

        let mut outputs: Vec<SnifferOutput> = self.affordances.clear().into_iter().map(Into::into).collect();
        outputs.push(SnifferOutput::Rebuilt {
            enabled: self.settings.enable_sniffing,
        });

        let Some(page) = self.detector.as_ref().map(|d| d.page().clone()) else {
            return outputs;
        };
        info!(
            "Rebuilding detector (sniffing {})",
            if self.settings.enable_sniffing { "on" } else { "off" }
        );

        let mut detector = ResourceDetector::new(DetectorConfig::from_settings(&self.settings), page);
        if let Some(document) = &self.document {
            push_scan(&mut outputs, detector.scan_document(document));
        }
        for html in &self.inserted {
            push_scan(&mut outputs, detector.scan_fragment(html));
        }
        self.detector = Some(detector);

        outputs
    }

    /// Fire due hide timers
    pub fn poll(&mut self, now: Instant) -> Vec<SnifferOutput> {
        self.affordances
            .poll(now, self.pointer)
            .into_iter()
            .map(Into::into)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.affordances.next_deadline()
    }

    fn retain_inserted(&mut self, html: String) {
        self.inserted_bytes += html.len();
        self.inserted.push_back(html);

        while self.inserted_bytes > self.markup_limit {
            let Some(dropped) = self.inserted.pop_front() else {
                break;
            };
            self.inserted_bytes -= dropped.len();
            debug!("Dropped {} bytes of old inserted markup", dropped.len());
        }
    }

    fn url_for(&self, element: ElementKey) -> Option<String> {
        self.detector
            .as_ref()
            .and_then(|d| d.url_for(element))
            .map(str::to_string)
    }
}

fn push_scan(outputs: &mut Vec<SnifferOutput>, result: ScanResult) {
    outputs.extend(
        result
            .added
            .into_iter()
            .map(|resource| SnifferOutput::Detected { resource }),
    );
    outputs.extend(
        result
            .matches
            .into_iter()
            .map(|(element, url)| SnifferOutput::Matched { element, url }),
    );
}

/// Drive a session from an event source until it closes.
///
/// Clicked resources are handed to `sink` on their own task so a slow relay
/// never delays hover handling.
pub async fn run(
    mut session: SnifferSession,
    mut events: mpsc::Receiver<PageEvent>,
    sink: Arc<dyn ResourceSink>,
    output: mpsc::Sender<SnifferOutput>,
) {
    loop {
        let deadline = session.next_deadline();

        let outputs = tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Page event source closed");
                    break;
                };
                let handled = session.handle(event, Instant::now());
                if let Some(resource) = handled.download {
                    spawn_download(
                        Arc::clone(&sink),
                        resource,
                        session.user_agent().map(str::to_string),
                        output.clone(),
                    );
                }
                handled.outputs
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                session.poll(Instant::now())
            }
        };

        for out in outputs {
            if output.send(out).await.is_err() {
                return;
            }
        }
    }
}

fn spawn_download(
    sink: Arc<dyn ResourceSink>,
    resource: Resource,
    user_agent: Option<String>,
    output: mpsc::Sender<SnifferOutput>,
) {
    tokio::spawn(async move {
        let report = match sink.download(&resource, user_agent.as_deref()).await {
            Ok(message) => SnifferOutput::Dispatched {
                url: resource.url.clone(),
                success: true,
                message,
            },
            Err(e) => SnifferOutput::Dispatched {
                url: resource.url.clone(),
                success: false,
                message: e.to_string(),
            },
        };
        let _ = output.send(report).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnifferError;
    use std::sync::Mutex;

    const PAGE: &str = r#"<body>
        <a href="/a.zip" data-gdl-node="1">a</a>
        <a href="/a.pdf" data-gdl-node="2">b</a>
        <a href="/about.pdf" data-gdl-node="3">c</a>
    </body>"#;

    fn settings(file_types: &str) -> Settings {
        Settings {
            file_types: file_types.to_string(),
            ..Settings::default()
        }
    }

    fn load() -> PageEvent {
        PageEvent::Load {
            url: "http://x/".to_string(),
            referrer: None,
            user_agent: Some("TestBrowser/1.0".to_string()),
            html: PAGE.to_string(),
        }
    }

    fn detected(outputs: &[SnifferOutput]) -> Vec<String> {
        outputs
            .iter()
            .filter_map(|o| match o {
                SnifferOutput::Detected { resource } => Some(resource.url.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_load_scans_document() {
        let mut session = SnifferSession::new(settings("zip,pdf"));
        let handled = session.handle(load(), Instant::now());

        assert_eq!(detected(&handled.outputs), vec!["http://x/a.zip", "http://x/a.pdf"]);
    }

    #[test]
    fn test_inserted_subtree_scanned() {
        let mut session = SnifferSession::new(settings("zip"));
        session.handle(load(), Instant::now());

        let handled = session.handle(
            PageEvent::SubtreeInserted {
                html: r#"<a href="/b.zip">b</a><a href="/a.zip">a</a>"#.to_string(),
            },
            Instant::now(),
        );
        assert_eq!(detected(&handled.outputs), vec!["http://x/b.zip"]);
        assert_eq!(session.detector().unwrap().resources().len(), 2);
    }

    #[test]
    fn test_inserted_markup_is_bounded() {
        let mut session = SnifferSession::new(settings("zip")).with_markup_limit(64);
        session.handle(load(), Instant::now());

        for i in 0..10 {
            session.handle(
                PageEvent::SubtreeInserted {
                    html: format!(r#"<a href="/f{}.zip">f</a>"#, i),
                },
                Instant::now(),
            );
        }
        assert!(session.retained_markup() <= 64);
        // Everything was detected when inserted
        assert_eq!(session.detector().unwrap().resources().len(), 11);

        // A rebuild rescans the document and only the newest insertions
        let outputs = session.apply_settings(settings("zip,pdf"));
        let rescanned = detected(&outputs);
        assert!(rescanned.contains(&"http://x/a.zip".to_string()));
        assert!(rescanned.contains(&"http://x/f9.zip".to_string()));
        assert!(!rescanned.contains(&"http://x/f0.zip".to_string()));
    }

    #[test]
    fn test_sniffing_off_rebuilds_empty() {
        let mut session = SnifferSession::new(settings("zip,pdf"));
        session.handle(load(), Instant::now());

        let outputs = session.apply_settings(Settings {
            enable_sniffing: false,
            ..settings("zip,pdf")
        });
        assert!(outputs.contains(&SnifferOutput::Rebuilt { enabled: false }));
        assert!(session.detector().unwrap().resources().is_empty());

        let handled = session.handle(
            PageEvent::SubtreeInserted {
                html: r#"<a href="/c.zip">c</a>"#.to_string(),
            },
            Instant::now(),
        );
        assert!(detected(&handled.outputs).is_empty());
    }

    #[test]
    fn test_file_types_change_rescans_everything() {
        let mut session = SnifferSession::new(settings("zip"));
        session.handle(load(), Instant::now());
        session.handle(
            PageEvent::SubtreeInserted {
                html: r#"<a href="/late.pdf">late</a>"#.to_string(),
            },
            Instant::now(),
        );

        let outputs = session.apply_settings(settings("pdf"));
        assert_eq!(detected(&outputs), vec!["http://x/a.pdf", "http://x/late.pdf"]);
    }

    #[test]
    fn test_unrelated_setting_keeps_detector() {
        let mut session = SnifferSession::new(settings("zip"));
        session.handle(load(), Instant::now());

        let outputs = session.apply_settings(Settings {
            max_threads: 8,
            ..settings("zip")
        });
        assert!(outputs.is_empty());
        assert_eq!(session.detector().unwrap().resources().len(), 1);
    }

    #[test]
    fn test_hover_and_click() {
        let mut session = SnifferSession::new(settings("zip"));
        let now = Instant::now();
        session.handle(load(), now);

        let handled = session.handle(
            PageEvent::HoverEnter {
                element: ElementKey(1),
                rect: Rect::new(0, 0, 50, 10),
            },
            now,
        );
        assert!(matches!(
            handled.outputs.as_slice(),
            [SnifferOutput::ShowButton { url, .. }] if url == "http://x/a.zip"
        ));

        // Element 3 carried an excluded URL, so it has no button
        let handled = session.handle(
            PageEvent::HoverEnter {
                element: ElementKey(3),
                rect: Rect::new(0, 40, 50, 10),
            },
            now,
        );
        assert!(handled.outputs.is_empty());

        let handled = session.handle(
            PageEvent::ButtonClick {
                url: "http://x/a.zip".to_string(),
            },
            now,
        );
        assert_eq!(
            handled.outputs,
            vec![SnifferOutput::HideButton {
                url: "http://x/a.zip".to_string()
            }]
        );
        assert_eq!(handled.download.unwrap().filename, "a.zip");
    }

    #[test]
    fn test_page_event_wire_format() {
        let event: PageEvent = serde_json::from_str(
            r#"{"event":"hover_enter","element":4,"rect":{"x":1,"y":2,"width":3,"height":4}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            PageEvent::HoverEnter {
                element: ElementKey(4),
                rect: Rect::new(1, 2, 3, 4),
            }
        );
    }

    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl ResourceSink for RecordingSink {
        async fn download(&self, resource: &Resource, user_agent: Option<&str>) -> Result<String, SnifferError> {
            self.requests
                .lock()
                .unwrap()
                .push((resource.url.clone(), user_agent.map(str::to_string)));
            Ok("Download task added".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_dispatches_and_hides() {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let sink = Arc::new(RecordingSink::default());
        let runner = tokio::spawn(run(
            SnifferSession::new(settings("zip")),
            event_rx,
            sink.clone(),
            out_tx,
        ));

        event_tx.send(load()).await.unwrap();
        event_tx
            .send(PageEvent::HoverEnter {
                element: ElementKey(1),
                rect: Rect::new(0, 0, 50, 10),
            })
            .await
            .unwrap();
        event_tx
            .send(PageEvent::HoverLeave { element: ElementKey(1) })
            .await
            .unwrap();

        let mut outputs = Vec::new();
        while !outputs.iter().any(|o| matches!(o, SnifferOutput::HideButton { .. })) {
            outputs.push(out_rx.recv().await.unwrap());
        }
        assert!(outputs.iter().any(|o| matches!(o, SnifferOutput::ShowButton { .. })));

        event_tx
            .send(PageEvent::ButtonClick {
                url: "http://x/a.zip".to_string(),
            })
            .await
            .unwrap();
        let report = loop {
            match out_rx.recv().await.unwrap() {
                report @ SnifferOutput::Dispatched { .. } => break report,
                _ => continue,
            }
        };
        assert_eq!(
            report,
            SnifferOutput::Dispatched {
                url: "http://x/a.zip".to_string(),
                success: true,
                message: "Download task added".to_string(),
            }
        );
        assert_eq!(
            sink.requests.lock().unwrap().as_slice(),
            &[("http://x/a.zip".to_string(), Some("TestBrowser/1.0".to_string()))]
        );

        drop(event_tx);
        runner.await.unwrap();
    }
}
