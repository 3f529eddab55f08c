//! Fixture-driven session backend.
//!
//! Implements the same element-location capability as the CDP backend over
//! an in-memory page script, so flows can be rehearsed and tested without a
//! browser. Pages are keyed by URL; clicking an element applies its declared
//! effects (navigation, revealing or hiding other elements).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::session::{AncestorInfo, Element, ElementHandle, Session};

/// What clicking (or keyboard-submitting) a scripted element does.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    /// Move the session to another page.
    Goto(String),
    /// Make another element visible.
    Reveal(u64),
    /// Make another element invisible.
    Hide(u64),
}

#[derive(Debug, Clone)]
pub struct ScriptedElement {
    pub element: Element,
    /// Selector strings this element answers to, besides its tag name and
    /// `#id`. Registering one element under several selectors exercises the
    /// scanner's identity deduplication.
    pub selectors: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub ancestors: Vec<AncestorInfo>,
    pub on_click: Vec<ClickEffect>,
    pub on_submit: Vec<ClickEffect>,
    /// Submit control of the enclosing form, when one exists.
    pub form_submit: Option<u64>,
    /// Number of native clicks an overlay still swallows.
    pub intercept_clicks: u32,
}

impl ScriptedElement {
    pub fn new(handle: u64, tag: &str) -> Self {
        Self {
            element: Element {
                handle: ElementHandle(handle),
                tag: tag.to_string(),
                visible: true,
                enabled: true,
                ..Element::default()
            },
            selectors: Vec::new(),
            attrs: HashMap::new(),
            ancestors: Vec::new(),
            on_click: Vec::new(),
            on_submit: Vec::new(),
            form_submit: None,
            intercept_clicks: 0,
        }
    }

    pub fn selector(mut self, s: &str) -> Self {
        self.selectors.push(s.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.element.id = Some(id.to_string());
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.element.kind = Some(kind.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.element.text = text.to_string();
        self
    }

    pub fn classes(mut self, classes: &str) -> Self {
        self.element.classes = classes.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.element.visible = false;
        self
    }

    pub fn disabled_marker(mut self) -> Self {
        self.element.disabled_marker = true;
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn ancestor(mut self, classes: &str, id: &str) -> Self {
        self.ancestors.push(AncestorInfo {
            classes: classes.to_string(),
            id: id.to_string(),
            visible: true,
        });
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click.push(effect);
        self
    }

    pub fn on_submit(mut self, effect: ClickEffect) -> Self {
        self.on_submit.push(effect);
        self
    }

    pub fn form_submit(mut self, handle: u64) -> Self {
        self.form_submit = Some(handle);
        self
    }

    pub fn intercepting(mut self, clicks: u32) -> Self {
        self.intercept_clicks = clicks;
        self
    }

    fn matches(&self, selector: &str) -> bool {
        if selector == self.element.tag {
            return true;
        }
        if let Some(id) = selector.strip_prefix('#') {
            return self.element.id.as_deref() == Some(id);
        }
        self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Default)]
struct ScriptedPage {
    text: String,
    elements: Vec<ScriptedElement>,
}

pub struct ScriptedSession {
    pages: HashMap<String, ScriptedPage>,
    current: String,
    /// Values typed into elements, by handle. Exposed for assertions.
    pub filled: HashMap<u64, String>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    pub fn new(entry_url: &str) -> Self {
        let mut pages = HashMap::new();
        pages.insert(entry_url.to_string(), ScriptedPage::default());
        Self {
            pages,
            current: entry_url.to_string(),
            filled: HashMap::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_page(&mut self, url: &str, text: &str) {
        self.pages.insert(
            url.to_string(),
            ScriptedPage {
                text: text.to_string(),
                elements: Vec::new(),
            },
        );
    }

    pub fn add_element(&mut self, url: &str, element: ScriptedElement) {
        self.pages
            .entry(url.to_string())
            .or_default()
            .elements
            .push(element);
    }

    /// Flag flipped by `close`; lets tests observe session teardown.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn find(&self, handle: ElementHandle) -> Result<&ScriptedElement> {
        self.pages
            .get(&self.current)
            .and_then(|p| p.elements.iter().find(|e| e.element.handle == handle))
            .ok_or(Error::Stale)
    }

    fn find_mut(&mut self, handle: ElementHandle) -> Result<&mut ScriptedElement> {
        let current = self.current.clone();
        self.pages
            .get_mut(&current)
            .and_then(|p| p.elements.iter_mut().find(|e| e.element.handle == handle))
            .ok_or(Error::Stale)
    }

    fn set_visibility(&mut self, handle: u64, visible: bool) {
        for page in self.pages.values_mut() {
            for el in &mut page.elements {
                if el.element.handle.0 == handle {
                    el.element.visible = visible;
                }
            }
        }
    }

    fn apply(&mut self, effects: Vec<ClickEffect>) {
        for effect in effects {
            match effect {
                ClickEffect::Goto(url) => {
                    self.pages.entry(url.clone()).or_default();
                    self.current = url;
                }
                ClickEffect::Reveal(h) => self.set_visibility(h, true),
                ClickEffect::Hide(h) => self.set_visibility(h, false),
            }
        }
    }
}

impl Session for ScriptedSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.pages.entry(url.to_string()).or_default();
        self.current = url.to_string();
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    fn query(&mut self, selectors: &[&str]) -> Result<Vec<Element>> {
        let page = self.pages.get(&self.current).ok_or(Error::Stale)?;
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for sel in selectors {
            for el in &page.elements {
                if el.matches(sel) && !seen.contains(&el.element.handle) {
                    seen.push(el.element.handle);
                    out.push(el.element.clone());
                }
            }
        }
        Ok(out)
    }

    fn refresh(&mut self, handle: ElementHandle) -> Result<Element> {
        Ok(self.find(handle)?.element.clone())
    }

    fn attribute(&mut self, handle: ElementHandle, name: &str) -> Result<Option<String>> {
        Ok(self.find(handle)?.attrs.get(name).cloned())
    }

    fn ancestors(&mut self, handle: ElementHandle, levels: usize) -> Result<Vec<AncestorInfo>> {
        Ok(self
            .find(handle)?
            .ancestors
            .iter()
            .take(levels)
            .cloned()
            .collect())
    }

    fn page_text(&mut self) -> Result<String> {
        let page = self.pages.get(&self.current).ok_or(Error::Stale)?;
        let mut text = page.text.clone();
        for el in &page.elements {
            if el.element.visible && !el.element.text.is_empty() {
                text.push('\n');
                text.push_str(&el.element.text);
            }
        }
        Ok(text)
    }

    fn click(&mut self, handle: ElementHandle) -> Result<()> {
        {
            let el = self.find_mut(handle)?;
            if el.intercept_clicks > 0 {
                el.intercept_clicks -= 1;
                return Err(Error::ClickIntercepted);
            }
        }
        let effects = self.find(handle)?.on_click.clone();
        self.apply(effects);
        Ok(())
    }

    fn click_js(&mut self, handle: ElementHandle) -> Result<()> {
        let effects = self.find(handle)?.on_click.clone();
        self.apply(effects);
        Ok(())
    }

    fn scroll_into_view(&mut self, _handle: ElementHandle) -> Result<()> {
        Ok(())
    }

    fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<()> {
        self.find(handle)?;
        self.filled.insert(handle.0, text.to_string());
        Ok(())
    }

    fn submit_via_keyboard(&mut self, handle: ElementHandle) -> Result<()> {
        let effects = self.find(handle)?.on_submit.clone();
        self.apply(effects);
        Ok(())
    }

    fn form_submit_control(&mut self, handle: ElementHandle) -> Result<Option<Element>> {
        let submit = self.find(handle)?.form_submit;
        match submit {
            Some(h) => Ok(Some(self.find(ElementHandle(h))?.element.clone())),
            None => Ok(None),
        }
    }

    fn focus_window_containing(&mut self, _fragment: &str) -> Result<bool> {
        // The scripted backend models a single window.
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_effects_navigate_and_reveal() {
        let mut s = ScriptedSession::new("https://x.test/a");
        s.add_element(
            "https://x.test/a",
            ScriptedElement::new(1, "button")
                .text("go")
                .on_click(ClickEffect::Goto("https://x.test/b".into())),
        );
        s.add_element(
            "https://x.test/b",
            ScriptedElement::new(2, "div").hidden(),
        );
        s.add_element(
            "https://x.test/b",
            ScriptedElement::new(3, "button").on_click(ClickEffect::Reveal(2)),
        );

        s.click(ElementHandle(1)).unwrap();
        assert_eq!(s.current_url().unwrap(), "https://x.test/b");
        assert!(!s.refresh(ElementHandle(2)).unwrap().visible);
        s.click(ElementHandle(3)).unwrap();
        assert!(s.refresh(ElementHandle(2)).unwrap().visible);
    }

    #[test]
    fn test_intercepted_clicks_then_native_click_succeeds() {
        let mut s = ScriptedSession::new("https://x.test/");
        s.add_element(
            "https://x.test/",
            ScriptedElement::new(1, "button").intercepting(2),
        );
        assert!(matches!(
            s.click(ElementHandle(1)),
            Err(Error::ClickIntercepted)
        ));
        assert!(matches!(
            s.click(ElementHandle(1)),
            Err(Error::ClickIntercepted)
        ));
        assert!(s.click(ElementHandle(1)).is_ok());
    }

    #[test]
    fn test_elements_from_other_pages_are_stale() {
        let mut s = ScriptedSession::new("https://x.test/a");
        s.add_element("https://x.test/a", ScriptedElement::new(1, "input"));
        s.navigate("https://x.test/b").unwrap();
        assert!(matches!(s.refresh(ElementHandle(1)), Err(Error::Stale)));
    }
}
