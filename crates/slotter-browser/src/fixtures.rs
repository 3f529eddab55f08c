//! Canned rehearsal script for the full booking funnel.
//!
//! A [`ScriptedSession`] covering every stage the flow walks: login form with
//! a consent banner, dashboard with the start control, the two dropdown
//! stages and a final page. Used by the tests here and by downstream crates
//! that rehearse orchestration without a browser.

use std::time::Duration;

use crate::flow::FlowConfig;
use crate::scripted::{ClickEffect, ScriptedElement, ScriptedSession};

pub const LOGIN_URL: &str = "https://v.test/login";
pub const DASHBOARD_URL: &str = "https://v.test/dashboard";
pub const APPOINTMENT_URL: &str = "https://v.test/appointment";
pub const FINAL_URL: &str = "https://v.test/final";

/// City offered by the location dropdown of the scripted site.
pub const CITY: &str = "Moscow";

/// Flow configuration with waits small enough for test runs.
pub fn fast_flow_config() -> FlowConfig {
    FlowConfig {
        entry_url: LOGIN_URL.into(),
        field_wait: Duration::from_millis(200),
        settle_delay: Duration::from_millis(10),
        nav_wait: Duration::from_millis(20),
        click_wait: Duration::from_millis(200),
        overlay_wait: Duration::from_millis(50),
        panel_wait: Duration::from_millis(200),
        poll_interval: Duration::from_millis(5),
        ..FlowConfig::default()
    }
}

/// The full funnel. With `with_submit_button` false the login form has no
/// submit control, exercising the keyboard-submit fallback.
///
/// Handles: 1 login field, 2 password field, 3 submit, 10 consent accept,
/// 20 start control (intercepted once), 30..35 the two dropdowns.
pub fn booking_site(with_submit_button: bool) -> ScriptedSession {
    let mut s = ScriptedSession::new(LOGIN_URL);
    s.add_element(
        LOGIN_URL,
        ScriptedElement::new(10, "button").id("onetrust-accept-btn-handler"),
    );
    s.add_element(
        LOGIN_URL,
        ScriptedElement::new(1, "input").kind("text").id("email"),
    );
    let mut password = ScriptedElement::new(2, "input").kind("password").id("password");
    if with_submit_button {
        password = password.form_submit(3);
        s.add_element(
            LOGIN_URL,
            ScriptedElement::new(3, "button")
                .kind("submit")
                .selector("button[type='submit']")
                .on_click(ClickEffect::Goto(DASHBOARD_URL.into())),
        );
    } else {
        password = password.on_submit(ClickEffect::Goto(DASHBOARD_URL.into()));
    }
    s.add_element(LOGIN_URL, password);

    s.add_element(
        DASHBOARD_URL,
        ScriptedElement::new(20, "button")
            .text("Start New Booking")
            .intercepting(1)
            .on_click(ClickEffect::Goto(APPOINTMENT_URL.into())),
    );

    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(30, "mat-select")
            .selector("mat-select[formcontrolname='centerCode']")
            .attr("aria-expanded", "false")
            .on_click(ClickEffect::Reveal(31))
            .on_click(ClickEffect::Reveal(32)),
    );
    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(31, "div").selector(".mat-mdc-select-panel").hidden(),
    );
    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(32, "mat-option")
            .text("Moscow (Vfs Centre)")
            .hidden()
            .on_click(ClickEffect::Hide(31))
            .on_click(ClickEffect::Hide(32)),
    );
    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(33, "mat-select")
            .text("Choose a sub-category")
            .on_click(ClickEffect::Reveal(34))
            .on_click(ClickEffect::Reveal(35)),
    );
    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(34, "div").selector(".mat-mdc-select-panel").hidden(),
    );
    s.add_element(
        APPOINTMENT_URL,
        ScriptedElement::new(35, "mat-option")
            .text("SEAMEN")
            .hidden()
            .on_click(ClickEffect::Hide(34))
            .on_click(ClickEffect::Hide(35))
            .on_click(ClickEffect::Goto(FINAL_URL.into())),
    );
    s.add_page(FINAL_URL, "Pick an appointment date below.");
    s
}
