//! Hover download buttons.
//!
//! One button per accepted URL, created on first hover. The button appears
//! just below the hovered element, and a hide is scheduled when the pointer
//! leaves the element so the user has time to reach the button. Time is
//! passed in by the caller, which keeps the state machine synchronous.

use crate::types::Rect;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Gap between the hovered element and its button
pub const BUTTON_OFFSET: i32 = 5;

/// Grace period after leaving an element before the button hides
pub const HIDE_DELAY: Duration = Duration::from_millis(100);

/// Nominal button footprint, used for the pointer-within check
pub const BUTTON_WIDTH: u32 = 180;
pub const BUTTON_HEIGHT: u32 = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Affordance {
    bounds: Rect,
    visible: bool,
    hide_at: Option<Instant>,
}

/// Visibility change the page side should render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonChange {
    Show { url: String, bounds: Rect },
    Hide { url: String },
}

#[derive(Debug, Default)]
pub struct AffordanceManager {
    buttons: HashMap<String, Affordance>,
}

impl AffordanceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer entered an element carrying `url`
    pub fn hover_enter(&mut self, url: &str, element: Rect) -> ButtonChange {
        let bounds = Rect::new(
            element.x,
            element.bottom() + BUTTON_OFFSET,
            BUTTON_WIDTH,
            BUTTON_HEIGHT,
        );

        let button = self
            .buttons
            .entry(url.to_string())
            .or_insert_with(|| {
                trace!("Creating button for {}", url);
                Affordance {
                    bounds,
                    visible: false,
                    hide_at: None,
                }
            });
        button.bounds = bounds;
        button.visible = true;
        button.hide_at = None;

        ButtonChange::Show {
            url: url.to_string(),
            bounds,
        }
    }

    /// Pointer left the element; hide after the grace period
    pub fn hover_leave(&mut self, url: &str, now: Instant) {
        if let Some(button) = self.buttons.get_mut(url) {
            if button.visible {
                button.hide_at = Some(now + HIDE_DELAY);
            }
        }
    }

    /// Pointer left the button itself
    pub fn button_leave(&mut self, url: &str) -> Option<ButtonChange> {
        self.hide(url)
    }

    /// Button clicked: hide at once. Returns whether the click was on a
    /// visible button.
    pub fn click(&mut self, url: &str) -> bool {
        self.hide(url).is_some()
    }

    /// Fire due hide timers. A button stays up when the pointer is inside it.
    pub fn poll(&mut self, now: Instant, pointer: Option<(i32, i32)>) -> Vec<ButtonChange> {
        let mut changes = Vec::new();

        for (url, button) in self.buttons.iter_mut() {
            let Some(hide_at) = button.hide_at else {
                continue;
            };
            if hide_at > now {
                continue;
            }

            button.hide_at = None;
            let over_button = pointer.is_some_and(|(x, y)| button.bounds.contains(x, y));
            if over_button {
                trace!("Pointer over button for {}, keeping it", url);
                continue;
            }

            button.visible = false;
            changes.push(ButtonChange::Hide { url: url.clone() });
        }

        changes
    }

    /// Earliest pending hide
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buttons.values().filter_map(|b| b.hide_at).min()
    }

    pub fn is_visible(&self, url: &str) -> bool {
        self.buttons.get(url).is_some_and(|b| b.visible)
    }

    pub fn bounds(&self, url: &str) -> Option<Rect> {
        self.buttons.get(url).map(|b| b.bounds)
    }

    /// Number of buttons created so far
    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    /// Drop every button, e.g. when the detector is rebuilt
    pub fn clear(&mut self) -> Vec<ButtonChange> {
        let hidden = self
            .buttons
            .iter()
            .filter(|(_, b)| b.visible)
            .map(|(url, _)| ButtonChange::Hide { url: url.clone() })
            .collect();
        self.buttons.clear();
        hidden
    }

    fn hide(&mut self, url: &str) -> Option<ButtonChange> {
        let button = self.buttons.get_mut(url)?;
        button.hide_at = None;
        if !button.visible {
            return None;
        }
        button.visible = false;
        Some(ButtonChange::Hide {
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://x/a.zip";

    fn element() -> Rect {
        Rect::new(100, 200, 80, 20)
    }

    #[test]
    fn test_button_created_lazily_below_element() {
        let mut manager = AffordanceManager::new();
        assert!(manager.is_empty());

        let change = manager.hover_enter(URL, element());
        assert_eq!(
            change,
            ButtonChange::Show {
                url: URL.to_string(),
                bounds: Rect::new(100, 225, BUTTON_WIDTH, BUTTON_HEIGHT),
            }
        );

        manager.hover_enter(URL, element());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_hides_after_delay() {
        let mut manager = AffordanceManager::new();
        let start = Instant::now();
        manager.hover_enter(URL, element());
        manager.hover_leave(URL, start);

        assert!(manager.poll(start + Duration::from_millis(99), None).is_empty());
        assert!(manager.is_visible(URL));

        let changes = manager.poll(start + HIDE_DELAY, None);
        assert_eq!(changes, vec![ButtonChange::Hide { url: URL.to_string() }]);
        assert!(!manager.is_visible(URL));
        assert_eq!(manager.next_deadline(), None);
    }

    #[test]
    fn test_pointer_on_button_keeps_it() {
        let mut manager = AffordanceManager::new();
        let start = Instant::now();
        manager.hover_enter(URL, element());
        manager.hover_leave(URL, start);

        let changes = manager.poll(start + HIDE_DELAY, Some((110, 230)));
        assert!(changes.is_empty());
        assert!(manager.is_visible(URL));

        assert!(manager.button_leave(URL).is_some());
        assert!(!manager.is_visible(URL));
    }

    #[test]
    fn test_reenter_cancels_pending_hide() {
        let mut manager = AffordanceManager::new();
        let start = Instant::now();
        manager.hover_enter(URL, element());
        manager.hover_leave(URL, start);
        manager.hover_enter(URL, element());

        assert!(manager.poll(start + Duration::from_secs(1), None).is_empty());
        assert!(manager.is_visible(URL));
    }

    #[test]
    fn test_click_hides_immediately() {
        let mut manager = AffordanceManager::new();
        manager.hover_enter(URL, element());

        assert!(manager.click(URL));
        assert!(!manager.is_visible(URL));
        assert!(!manager.click(URL));
        assert!(!manager.click("http://x/unknown.zip"));
    }
}
