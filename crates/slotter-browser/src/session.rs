use crate::error::Result;

/// Opaque reference to an element found by a scan. Valid until the next
/// navigation of the page that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ElementHandle(pub u64);

/// Snapshot of one element as seen at scan time.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub handle: ElementHandle,
    pub tag: String,
    /// The `type` attribute, for inputs and buttons.
    pub kind: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub placeholder: Option<String>,
    pub classes: String,
    pub src: Option<String>,
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    /// True while a `disabled`/`aria-disabled` marker is still active.
    pub disabled_marker: bool,
}

impl Element {
    pub fn actionable(&self) -> bool {
        self.visible && self.enabled && !self.disabled_marker
    }

    pub fn text_contains(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(&needle.trim().to_lowercase())
    }

    pub fn id_is(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

/// Class/id summary of one ancestor, for banner confirmation walks.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AncestorInfo {
    pub classes: String,
    pub id: String,
    pub visible: bool,
}

/// One remote page, as the worker domain sees it. All calls block.
///
/// `query` is the element-location capability: it collects matches across the
/// main document, every open shadow subtree and every reachable same-origin
/// nested frame, skipping cross-origin frames, deduplicated by element
/// identity. How the traversal happens is up to the backend.
pub trait Session: Send {
    fn navigate(&mut self, url: &str) -> Result<()>;

    fn current_url(&mut self) -> Result<String>;

    fn query(&mut self, selectors: &[&str]) -> Result<Vec<Element>>;

    /// Re-read the live state of a previously scanned element.
    fn refresh(&mut self, handle: ElementHandle) -> Result<Element>;

    fn attribute(&mut self, handle: ElementHandle, name: &str) -> Result<Option<String>>;

    /// Summaries of up to `levels` ancestors, nearest first.
    fn ancestors(&mut self, handle: ElementHandle, levels: usize) -> Result<Vec<AncestorInfo>>;

    /// Rendered text of the page, concatenated over every reachable frame.
    fn page_text(&mut self) -> Result<String>;

    /// Native click. Fails with `Error::ClickIntercepted` when another
    /// element covers the target.
    fn click(&mut self, handle: ElementHandle) -> Result<()>;

    /// Programmatic click, ignoring hit testing.
    fn click_js(&mut self, handle: ElementHandle) -> Result<()>;

    fn scroll_into_view(&mut self, handle: ElementHandle) -> Result<()>;

    /// Clear the field and type `text`, firing the change events a framework
    /// form expects.
    fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<()>;

    /// Keyboard-submit fallback: focus the element and send Enter.
    fn submit_via_keyboard(&mut self, handle: ElementHandle) -> Result<()>;

    /// Submit control of the nearest enclosing form, if any.
    fn form_submit_control(&mut self, handle: ElementHandle) -> Result<Option<Element>>;

    /// Switch focus to the first window whose URL contains `fragment`.
    fn focus_window_containing(&mut self, fragment: &str) -> Result<bool>;

    /// Tear the session down. Called exactly once at worker stop.
    fn close(&mut self) -> Result<()>;
}

/// Builds the one session a worker owns for its lifetime.
pub type SessionFactory = Box<dyn FnOnce() -> Result<Box<dyn Session>> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_requires_all_three_flags() {
        let mut el = Element {
            visible: true,
            enabled: true,
            ..Element::default()
        };
        assert!(el.actionable());
        el.disabled_marker = true;
        assert!(!el.actionable());
        el.disabled_marker = false;
        el.visible = false;
        assert!(!el.actionable());
    }

    #[test]
    fn test_text_contains_is_case_insensitive_substring() {
        let el = Element {
            text: "Start New Booking".into(),
            ..Element::default()
        };
        assert!(el.text_contains("start new"));
        assert!(el.text_contains("  BOOKING "));
        assert!(!el.text_contains("cancel"));
    }
}
