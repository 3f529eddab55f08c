//! Stateless DOM heuristics over a [`Session`].
//!
//! These gate retries and manual pauses, they are not correctness-critical:
//! every entry point degrades to "not found" on a session fault. A false
//! negative costs a retry, a false positive costs an unnecessary pause;
//! neither corrupts state.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::session::{Element, Session};

/// Button-like controls: native buttons/inputs, ARIA buttons and the button
/// class patterns of the common UI libraries.
pub const BUTTON_LIKE_SELECTORS: &[&str] = &[
    "button",
    "input[type='button']",
    "input[type='submit']",
    "input[type='image']",
    "input[type='reset']",
    "[role='button']",
    ".btn",
    "[class*='btn']",
    "[class*='button']",
    ".mdc-button",
    ".mat-button",
    ".mat-raised-button",
    ".mat-mdc-button",
    ".mat-mdc-raised-button",
    ".ant-btn",
    ".MuiButton-root",
    ".chakra-button",
    ".v-btn",
    ".uk-button",
];

/// Challenge widgets that are logically present before paint; their mere
/// presence is authoritative even when layout reports them invisible.
const CHALLENGE_PRESENCE_SELECTORS: &[&str] = &[
    "input[name='cf-turnstile-response']",
    "div.cf-turnstile",
    "div[id^='cf-chl-widget']",
    "iframe[src*='challenges.cloudflare.com']",
    "iframe[src*='turnstile']",
    "iframe[title*='Cloudflare']",
];

/// Challenge widgets that count only when visible.
const CHALLENGE_VISIBLE_SELECTORS: &[&str] = &[
    "iframe[src*='google.com/recaptcha']",
    "iframe[src*='recaptcha']",
    "iframe[title*='reCAPTCHA']",
    ".g-recaptcha",
    "div[id^='rc-anchor-container']",
    "iframe[src*='hcaptcha.com']",
    ".h-captcha",
    "div.cf-challenge",
    "div[id^='cf-challenge']",
];

const CHALLENGE_TEXT_TAGS: &[&str] = &["label", "div", "span", "p", "button", "h1", "h2", "h3"];

const CONSENT_CONTAINER_SELECTORS: &[&str] = &[
    "#onetrust-banner-sdk",
    "#onetrust-consent-sdk",
    "#CybotCookiebotDialog",
    "#cookie-law-info-bar",
    ".cky-consent-container",
    "#qc-cmp2-container",
    "#truste-consent",
    ".didomi-popup",
    "[id^='sp_message_container']",
];

const CONSENT_CLICKABLE_SELECTORS: &[&str] = &["button", "a", "[role='button']"];

/// Known accept controls, tried before any heuristic dismissal.
const CONSENT_ACCEPT_SELECTORS: &[&str] = &["#onetrust-accept-btn-handler"];

/// Levels walked up from a cookie-text match to confirm a banner container.
const CONSENT_ANCESTOR_LEVELS: usize = 5;

const ALERT_CONTAINER_SELECTORS: &[&str] =
    &["div[role='alert']", ".alert", ".alert-info", ".alert-info-blue"];

/// Loading/overlay indicators that block clicks while visible.
pub const OVERLAY_SELECTORS: &[&str] = &[
    ".sk-ball-spin-clockwise",
    ".ngx-spinner-overlay",
    ".block-ui-wrapper.active",
    ".mat-mdc-progress-bar",
    ".mat-mdc-progress-spinner",
    "div[role='progressbar']",
];

pub const NO_SLOTS_PHRASES: &[&str] = &[
    "no appointment slots are currently available",
    "no appointment slots",
    "no appointments available",
    "no appointment slots available",
    "slots are currently unavailable",
];

lazy_static! {
    static ref CHALLENGE_TEXT_RE: Regex = Regex::new(
        r"(?i)(i'?m not a robot|i am human|verify you are human|select all images|click each image|checking your browser|please stand by|подтвердите, что вы не робот|я не робот|выберите все изображения|подтвердите человечность|пройдите проверку|проверка браузера)"
    )
    .unwrap();
    static ref CONSENT_TEXT_RE: Regex = Regex::new(
        r"(?i)(cookies?|cookie settings|accept( all)?|agree|allow|we use cookies|manage preferences|используем.*cookie|файлы cookie|принять|принять все|соглас(ен|ие)|разрешить)"
    )
    .unwrap();
    static ref CONSENT_ANCESTOR_RE: Regex = Regex::new(r"(?i)(cookie|consent|gdpr|cmp)").unwrap();
}

fn degrade<T: Default>(what: &str, result: crate::error::Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            debug!(what, error = %e, "scan degraded to not-found");
            T::default()
        }
    }
}

/// Every input element on the page, across shadow trees and reachable frames.
pub fn inputs(session: &mut dyn Session) -> Vec<Element> {
    degrade("inputs", session.query(&["input"])).into_iter()
        .filter(|el| el.tag.eq_ignore_ascii_case("input"))
        .collect()
}

/// Every button-like element, using the extensible selector set.
pub fn buttons(session: &mut dyn Session) -> Vec<Element> {
    degrade("buttons", session.query(BUTTON_LIKE_SELECTORS))
}

/// True when a challenge screen is active.
pub fn challenge_present(session: &mut dyn Session) -> bool {
    // Tier 1: presence of a known widget, visible or not.
    let present = degrade("challenge presence", session.query(CHALLENGE_PRESENCE_SELECTORS));
    if !present.is_empty() {
        return true;
    }

    // Tier 2: known widgets that must actually be visible.
    let visible = degrade("challenge widgets", session.query(CHALLENGE_VISIBLE_SELECTORS));
    if visible.iter().any(|el| el.visible) {
        return true;
    }

    // Tier 3: multilingual visible-text fallback.
    let texts = degrade("challenge text", session.query(CHALLENGE_TEXT_TAGS));
    texts
        .iter()
        .any(|el| el.visible && CHALLENGE_TEXT_RE.is_match(&el.text))
}

/// True when a consent/cookie banner is visible.
pub fn consent_banner_present(session: &mut dyn Session) -> bool {
    let containers = degrade("consent containers", session.query(CONSENT_CONTAINER_SELECTORS));
    if containers.iter().any(|el| el.visible) {
        return true;
    }

    // Visible clickable with consent-ish text, confirmed by an ancestor walk
    // for banner-ish class/id tokens.
    let clickables = degrade("consent clickables", session.query(CONSENT_CLICKABLE_SELECTORS));
    for el in clickables.iter().filter(|el| el.visible) {
        if el.text.trim().is_empty() || !CONSENT_TEXT_RE.is_match(&el.text) {
            continue;
        }
        if CONSENT_ANCESTOR_RE.is_match(&el.classes) || CONSENT_ANCESTOR_RE.is_match(&el.text) {
            return true;
        }
        let ancestors = degrade(
            "consent ancestors",
            session.ancestors(el.handle, CONSENT_ANCESTOR_LEVELS),
        );
        if ancestors.iter().any(|a| {
            a.visible
                && (CONSENT_ANCESTOR_RE.is_match(&a.classes) || CONSENT_ANCESTOR_RE.is_match(&a.id))
        }) {
            return true;
        }
    }
    false
}

/// A visible, enabled control that dismisses a known consent banner.
pub fn consent_accept_control(session: &mut dyn Session) -> Option<Element> {
    degrade("consent accept", session.query(CONSENT_ACCEPT_SELECTORS))
        .into_iter()
        .find(|el| el.visible && el.enabled)
}

/// True when the page reports that no appointment slots are available.
/// Alert-role containers are checked first, then the whole rendered text of
/// every reachable frame.
pub fn no_slots_notice(session: &mut dyn Session) -> bool {
    let matches_phrase = |text: &str| {
        let t = text.trim().to_lowercase();
        NO_SLOTS_PHRASES.iter().any(|p| t.contains(p))
    };

    let alerts = degrade("alert containers", session.query(ALERT_CONTAINER_SELECTORS));
    if alerts.iter().any(|el| matches_phrase(&el.text)) {
        return true;
    }

    let text = degrade("page text", session.page_text());
    matches_phrase(&text)
}

/// True while any known loading/overlay indicator is visible.
pub fn overlays_visible(session: &mut dyn Session) -> bool {
    degrade("overlays", session.query(OVERLAY_SELECTORS))
        .iter()
        .any(|el| el.visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedElement, ScriptedSession};

    const URL: &str = "https://x.test/";

    #[test]
    fn test_query_deduplicates_by_element_identity() {
        let mut s = ScriptedSession::new(URL);
        // Three inputs; one lives in a shadow subtree and also answers the
        // bare tag selector, one sits inside a nested frame fixture.
        s.add_element(URL, ScriptedElement::new(1, "input").kind("text"));
        s.add_element(
            URL,
            ScriptedElement::new(2, "input").kind("email").selector("input[type='email']"),
        );
        s.add_element(
            URL,
            ScriptedElement::new(3, "input").kind("password").selector("input[type='password']"),
        );
        let found = s
            .query(&["input", "input[type='email']", "input[type='password']"])
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_inputs_reports_only_input_tags() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(URL, ScriptedElement::new(1, "input").kind("text"));
        s.add_element(URL, ScriptedElement::new(2, "textarea").selector("input"));
        assert_eq!(inputs(&mut s).len(), 1);
    }

    #[test]
    fn test_challenge_marker_is_authoritative_even_when_invisible() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "input")
                .selector("input[name='cf-turnstile-response']")
                .hidden(),
        );
        assert!(challenge_present(&mut s));
    }

    #[test]
    fn test_visible_tier_widget_requires_visibility() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "iframe").selector("iframe[src*='recaptcha']").hidden(),
        );
        assert!(!challenge_present(&mut s));
        s.add_element(
            URL,
            ScriptedElement::new(2, "iframe").selector("iframe[src*='recaptcha']"),
        );
        assert!(challenge_present(&mut s));
    }

    #[test]
    fn test_challenge_text_fallback_matches_multilingual_phrases() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(URL, ScriptedElement::new(1, "div").text("Я не робот"));
        assert!(challenge_present(&mut s));

        let mut s = ScriptedSession::new(URL);
        s.add_element(URL, ScriptedElement::new(1, "span").text("Verify you are human"));
        assert!(challenge_present(&mut s));
    }

    #[test]
    fn test_consent_banner_needs_ancestor_confirmation() {
        let mut s = ScriptedSession::new(URL);
        // "Accept" text alone, with unrelated ancestors: no banner.
        s.add_element(
            URL,
            ScriptedElement::new(1, "button").text("Accept").ancestor("toolbar", "main-nav"),
        );
        assert!(!consent_banner_present(&mut s));

        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "button")
                .text("Accept all")
                .ancestor("banner-footer", "gdpr-dialog"),
        );
        assert!(consent_banner_present(&mut s));
    }

    #[test]
    fn test_known_consent_container_wins_when_visible() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "div").selector("#onetrust-banner-sdk"),
        );
        assert!(consent_banner_present(&mut s));
    }

    #[test]
    fn test_no_slots_from_alert_container_and_page_text() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "div")
                .selector("div[role='alert']")
                .text("No appointment slots are currently available"),
        );
        assert!(no_slots_notice(&mut s));

        let mut s = ScriptedSession::new(URL);
        s.add_page(URL, "Sorry. No appointments available at this center.");
        assert!(no_slots_notice(&mut s));

        let mut s = ScriptedSession::new(URL);
        s.add_page(URL, "Pick a date below.");
        assert!(!no_slots_notice(&mut s));
    }

    #[test]
    fn test_overlay_detection_tracks_visibility() {
        let mut s = ScriptedSession::new(URL);
        s.add_element(
            URL,
            ScriptedElement::new(1, "div").selector(".ngx-spinner-overlay").hidden(),
        );
        assert!(!overlays_visible(&mut s));
        s.add_element(
            URL,
            ScriptedElement::new(2, "div").selector("div[role='progressbar']"),
        );
        assert!(overlays_visible(&mut s));
    }
}
