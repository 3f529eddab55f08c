//! Chrome DevTools session backend.
//!
//! Owns its own tokio runtime so the blocking [`Session`] contract can sit on
//! top of chromiumoxide's async API from the worker thread. Element location
//! runs as injected script in the page's main world: matches across the
//! document, open shadow subtrees and same-origin frames are registered in a
//! window-level array, and the array index becomes the element handle. A
//! navigation discards the window, which is what invalidates old handles.

use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{AncestorInfo, Element, ElementHandle, Session, SessionFactory};

#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// DevTools endpoint of an already-running browser.
    pub endpoint: String,
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9222".into(),
            connect_retries: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl CdpConfig {
    /// Factory handed to a worker; connection happens on the worker thread.
    pub fn into_factory(self) -> SessionFactory {
        Box::new(move || Ok(Box::new(CdpSession::connect(&self)?) as Box<dyn Session>))
    }
}

/// Shared script prelude: the handle registry plus the snapshot shape the
/// Rust side deserializes. Keep `snap` in sync with [`RawElement`].
const JS_PRELUDE: &str = r#"
const reg = window.__slotterReg = window.__slotterReg || [];
const lookup = (h) => {
    const el = reg[h - 1];
    return el && el.isConnected ? el : null;
};
const isVisible = (el) => {
    try {
        const w = el.ownerDocument.defaultView;
        const cs = w.getComputedStyle(el);
        if (cs.display === 'none' || cs.visibility === 'hidden' || +cs.opacity === 0) return false;
        const r = el.getBoundingClientRect();
        return r.width > 0 && r.height > 0;
    } catch (e) {
        return false;
    }
};
const snap = (el) => {
    let h = reg.indexOf(el);
    if (h === -1) { reg.push(el); h = reg.length - 1; }
    const cls = typeof el.className === 'string' ? el.className : '';
    return {
        handle: h + 1,
        tag: (el.tagName || '').toLowerCase(),
        kind: el.getAttribute('type'),
        name: el.getAttribute('name'),
        id: el.id || null,
        placeholder: el.getAttribute('placeholder'),
        classes: cls,
        src: el.getAttribute('src'),
        text: ((el.innerText || el.value || '') + '').trim().slice(0, 400),
        visible: isVisible(el),
        enabled: el.disabled !== true,
        disabled_marker: el.disabled === true
            || el.getAttribute('aria-disabled') === 'true'
            || cls.indexOf('mat-select-disabled') !== -1,
    };
};
"#;

/// Wire shape produced by `snap` in [`JS_PRELUDE`].
#[derive(Debug, Deserialize)]
struct RawElement {
    handle: u64,
    tag: String,
    kind: Option<String>,
    name: Option<String>,
    id: Option<String>,
    placeholder: Option<String>,
    classes: String,
    src: Option<String>,
    text: String,
    visible: bool,
    enabled: bool,
    disabled_marker: bool,
}

impl From<RawElement> for Element {
    fn from(raw: RawElement) -> Self {
        Element {
            handle: ElementHandle(raw.handle),
            tag: raw.tag,
            kind: raw.kind,
            name: raw.name,
            id: raw.id,
            placeholder: raw.placeholder,
            classes: raw.classes,
            src: raw.src,
            text: raw.text,
            visible: raw.visible,
            enabled: raw.enabled,
            disabled_marker: raw.disabled_marker,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClickTarget {
    #[serde(default)]
    stale: bool,
    #[serde(default)]
    intercepted: bool,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

pub struct CdpSession {
    rt: Runtime,
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
}

impl CdpSession {
    /// Attach to the DevTools endpoint, retrying while the browser is still
    /// coming up, and adopt its first page.
    pub fn connect(cfg: &CdpConfig) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let (browser, handler_task, page) = rt.block_on(async {
            let mut attempt = 0u32;
            let (browser, mut handler) = loop {
                attempt += 1;
                match Browser::connect(&cfg.endpoint).await {
                    Ok(pair) => break pair,
                    Err(e) if attempt < cfg.connect_retries => {
                        warn!(attempt, error = %e, "devtools connect failed, retrying");
                        tokio::time::sleep(cfg.retry_delay).await;
                    }
                    Err(e) => return Err(Error::from(e)),
                }
            };
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!(error = %e, "devtools handler event error");
                    }
                }
            });
            let page = match browser.pages().await?.into_iter().next() {
                Some(page) => page,
                None => browser.new_page("about:blank").await?,
            };
            Ok((browser, handler_task, page))
        })?;

        info!(endpoint = %cfg.endpoint, "attached to browser");
        Ok(Self {
            rt,
            browser,
            handler_task,
            page,
        })
    }

    fn eval_json(&self, body: &str) -> Result<serde_json::Value> {
        let expr = format!("(() => {{\n{JS_PRELUDE}\n{body}\n}})()");
        self.rt.block_on(async {
            let result = self
                .page
                .evaluate(expr)
                .await?
                .into_value::<String>()
                .map_err(|e| Error::Script(e.to_string()))?;
            serde_json::from_str(&result).map_err(|e| Error::Script(e.to_string()))
        })
    }

    /// Evaluate a body that returns a serialized element, or null when the
    /// handle no longer resolves to a connected node.
    fn eval_element(&self, body: &str) -> Result<Element> {
        match self.eval_json(body)? {
            serde_json::Value::Null => Err(Error::Stale),
            value => {
                let raw: RawElement =
                    serde_json::from_value(value).map_err(|e| Error::Script(e.to_string()))?;
                Ok(raw.into())
            }
        }
    }

    /// Evaluate a body that acts on one element and returns a status string.
    fn eval_action(&self, handle: ElementHandle, action: &str) -> Result<()> {
        let body = format!(
            "const el = lookup({h});\n\
             if (!el) return JSON.stringify('stale');\n\
             const w = el.ownerDocument.defaultView;\n\
             {action}\n\
             return JSON.stringify('ok');",
            h = handle.0
        );
        match self.eval_json(&body)? {
            serde_json::Value::String(s) if s == "ok" => Ok(()),
            serde_json::Value::String(s) if s == "stale" => Err(Error::Stale),
            other => Err(Error::Script(format!("unexpected action result: {other}"))),
        }
    }
}

impl Session for CdpSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.rt.block_on(async {
            self.page.goto(url).await?;
            if let Err(e) = self.page.wait_for_navigation().await {
                debug!(error = %e, "navigation wait ended early");
            }
            Ok(())
        })
    }

    fn current_url(&mut self) -> Result<String> {
        self.rt
            .block_on(async { Ok(self.page.url().await?.unwrap_or_default()) })
    }

    fn query(&mut self, selectors: &[&str]) -> Result<Vec<Element>> {
        let sels =
            serde_json::to_string(selectors).map_err(|e| Error::Script(e.to_string()))?;
        let body = format!(
            r#"
const sels = {sels};
const seen = new Set();
const out = [];
const walk = (root) => {{
    for (const sel of sels) {{
        let found = [];
        try {{ found = root.querySelectorAll(sel); }} catch (e) {{ continue; }}
        for (const el of found) {{
            if (seen.has(el)) continue;
            seen.add(el);
            out.push(snap(el));
        }}
    }}
    for (const el of root.querySelectorAll('*')) {{
        if (el.shadowRoot) walk(el.shadowRoot);
        if (el.tagName === 'IFRAME' || el.tagName === 'FRAME') {{
            try {{ if (el.contentDocument) walk(el.contentDocument); }} catch (e) {{}}
        }}
    }}
}};
walk(document);
return JSON.stringify(out);
"#
        );
        let value = self.eval_json(&body)?;
        let raw: Vec<RawElement> =
            serde_json::from_value(value).map_err(|e| Error::Script(e.to_string()))?;
        Ok(raw.into_iter().map(Element::from).collect())
    }

    fn refresh(&mut self, handle: ElementHandle) -> Result<Element> {
        let body = format!(
            "const el = lookup({});\n\
             return JSON.stringify(el ? snap(el) : null);",
            handle.0
        );
        self.eval_element(&body)
    }

    fn attribute(&mut self, handle: ElementHandle, name: &str) -> Result<Option<String>> {
        let name = serde_json::to_string(name).map_err(|e| Error::Script(e.to_string()))?;
        let body = format!(
            "const el = lookup({});\n\
             if (!el) return JSON.stringify({{stale: true}});\n\
             return JSON.stringify({{value: el.getAttribute({name})}});",
            handle.0
        );
        let value = self.eval_json(&body)?;
        if value.get("stale").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(Error::Stale);
        }
        Ok(value
            .get("value")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn ancestors(&mut self, handle: ElementHandle, levels: usize) -> Result<Vec<AncestorInfo>> {
        let body = format!(
            r#"
const el = lookup({h});
if (!el) return JSON.stringify(null);
const out = [];
let cur = el;
while (out.length < {levels}) {{
    let parent = cur.parentElement;
    if (!parent) {{
        const root = cur.getRootNode();
        parent = root && root.host ? root.host : null;
    }}
    if (!parent) break;
    out.push({{
        classes: typeof parent.className === 'string' ? parent.className : '',
        id: parent.id || '',
        visible: isVisible(parent),
    }});
    cur = parent;
}}
return JSON.stringify(out);
"#,
            h = handle.0,
            levels = levels
        );
        match self.eval_json(&body)? {
            serde_json::Value::Null => Err(Error::Stale),
            value => serde_json::from_value(value).map_err(|e| Error::Script(e.to_string())),
        }
    }

    fn page_text(&mut self) -> Result<String> {
        let body = r#"
const parts = [];
const walk = (doc) => {
    try { if (doc.body) parts.push(doc.body.innerText); } catch (e) {}
    for (const f of doc.querySelectorAll('iframe,frame')) {
        try { if (f.contentDocument) walk(f.contentDocument); } catch (e) {}
    }
};
walk(document);
return JSON.stringify(parts.join('\n'));
"#;
        match self.eval_json(body)? {
            serde_json::Value::String(s) => Ok(s),
            other => Err(Error::Script(format!("unexpected page text: {other}"))),
        }
    }

    fn click(&mut self, handle: ElementHandle) -> Result<()> {
        // Hit-test at the element's center first; a covering element means
        // a native click would land on the overlay instead.
        let body = format!(
            r#"
const el = lookup({h});
if (!el) return JSON.stringify({{stale: true}});
const r = el.getBoundingClientRect();
if (r.width === 0 || r.height === 0) return JSON.stringify({{intercepted: true}});
const doc = el.ownerDocument;
const cx = r.left + r.width / 2;
const cy = r.top + r.height / 2;
const hit = doc.elementFromPoint(cx, cy);
const clear = hit && (hit === el || el.contains(hit) || hit.contains(el));
let ax = cx, ay = cy;
let win = doc.defaultView;
let f = win.frameElement;
while (f) {{
    const fr = f.getBoundingClientRect();
    ax += fr.left;
    ay += fr.top;
    win = win.parent;
    f = win.frameElement;
}}
return JSON.stringify({{x: ax, y: ay, intercepted: !clear}});
"#,
            h = handle.0
        );
        let target: ClickTarget = serde_json::from_value(self.eval_json(&body)?)
            .map_err(|e| Error::Script(e.to_string()))?;
        if target.stale {
            return Err(Error::Stale);
        }
        if target.intercepted {
            return Err(Error::ClickIntercepted);
        }
        self.rt.block_on(async {
            self.page
                .click(Point::new(target.x, target.y))
                .await
                .map(|_| ())
                .map_err(Error::from)
        })
    }

    fn click_js(&mut self, handle: ElementHandle) -> Result<()> {
        self.eval_action(handle, "el.click();")
    }

    fn scroll_into_view(&mut self, handle: ElementHandle) -> Result<()> {
        self.eval_action(handle, "el.scrollIntoView({block: 'center', inline: 'center'});")
    }

    fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<()> {
        let text = serde_json::to_string(text).map_err(|e| Error::Script(e.to_string()))?;
        // The native value setter bypasses framework wrappers; the events
        // afterwards tell the framework the value changed.
        let action = format!(
            r#"
const proto = el instanceof w.HTMLTextAreaElement
    ? w.HTMLTextAreaElement.prototype
    : w.HTMLInputElement.prototype;
const desc = Object.getOwnPropertyDescriptor(proto, 'value');
if (desc && desc.set) {{ desc.set.call(el, {text}); }} else {{ el.value = {text}; }}
el.dispatchEvent(new w.Event('input', {{bubbles: true}}));
el.dispatchEvent(new w.Event('change', {{bubbles: true}}));
"#
        );
        self.eval_action(handle, &action)
    }

    fn submit_via_keyboard(&mut self, handle: ElementHandle) -> Result<()> {
        let action = r#"
el.focus();
const key = (t) => new w.KeyboardEvent(t, {
    key: 'Enter', code: 'Enter', keyCode: 13, which: 13,
    bubbles: true, cancelable: true,
});
const proceed = el.dispatchEvent(key('keydown'));
el.dispatchEvent(key('keyup'));
if (proceed && el.form) {
    el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit();
}
"#;
        self.eval_action(handle, action)
    }

    fn form_submit_control(&mut self, handle: ElementHandle) -> Result<Option<Element>> {
        let body = format!(
            r#"
const el = lookup({h});
if (!el || !el.form) return JSON.stringify(null);
const submit = el.form.querySelector(
    "button[type='submit'], input[type='submit'], button:not([type])"
);
return JSON.stringify(submit ? snap(submit) : null);
"#,
            h = handle.0
        );
        match self.eval_json(&body)? {
            serde_json::Value::Null => Ok(None),
            value => {
                let raw: RawElement =
                    serde_json::from_value(value).map_err(|e| Error::Script(e.to_string()))?;
                Ok(Some(raw.into()))
            }
        }
    }

    fn focus_window_containing(&mut self, fragment: &str) -> Result<bool> {
        let pages = self.rt.block_on(self.browser.pages())?;
        for page in pages {
            let url = self
                .rt
                .block_on(page.url())
                .unwrap_or_default()
                .unwrap_or_default();
            if url.contains(fragment) {
                self.rt.block_on(page.bring_to_front())?;
                debug!(url = %url, "adopted window");
                self.page = page;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        if let Err(e) = self.rt.block_on(self.browser.close()) {
            warn!(error = %e, "browser close failed");
        }
        self.handler_task.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_shape_deserializes() {
        // Mirrors the object literal `snap` produces in JS_PRELUDE.
        let raw: RawElement = serde_json::from_str(
            r#"{
                "handle": 7, "tag": "input", "kind": "password", "name": null,
                "id": "password", "placeholder": null, "classes": "form-control",
                "src": null, "text": "", "visible": true, "enabled": true,
                "disabled_marker": false
            }"#,
        )
        .unwrap();
        let el: Element = raw.into();
        assert_eq!(el.handle, ElementHandle(7));
        assert!(el.actionable());
        assert!(el.id_is("password"));
    }

    #[test]
    fn test_selector_lists_embed_as_valid_json() {
        let sels = serde_json::to_string(&["input", "button[type='submit']", "[class*='btn']"])
            .unwrap();
        assert_eq!(sels, r#"["input","button[type='submit']","[class*='btn']"]"#);
    }

    #[test]
    fn test_default_config_targets_local_devtools() {
        let cfg = CdpConfig::default();
        assert_eq!(cfg.endpoint, "http://127.0.0.1:9222");
        assert_eq!(cfg.connect_retries, 5);
    }
}
