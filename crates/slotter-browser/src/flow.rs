//! The booking state machine: one long sequential procedure per attempt,
//! with explicit stages and a cancellation checkpoint after each one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use slotter_core::{BookingOutcome, BookingRequest, OperatorEvent};

use crate::error::{Error, WorkerError};
use crate::gate::{GateWait, PauseGate};
use crate::scan;
use crate::session::{Element, ElementHandle, Session};

/// Identifier candidates for the credential fields, tried before the
/// first-visible-of-kind fallback.
const LOGIN_FIELD_IDS: &[&str] = &["email", "username", "login"];
const PASSWORD_FIELD_ID: &str = "password";

const SUBMIT_SELECTORS: &[&str] = &["button[type='submit']", "input[type='submit']"];

/// Ordered locator strategies for the start-booking control; first match wins.
const START_ID_SELECTORS: &[&str] = &["#start_new_booking", "[id*='start_new_booking']"];
const START_TEXT: &str = "start new booking";

const DROPDOWN_SELECTOR: &str = "mat-select";
const OPTION_SELECTOR: &str = "mat-option";
const PANEL_SELECTORS: &[&str] = &[".mat-mdc-select-panel", ".mat-select-panel"];

#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Entry page of the booking site; also where credentials are entered.
    pub entry_url: String,
    /// URL fragment identifying the login window after the manual tab check.
    pub login_fragment: String,
    /// Bound on waiting for a credential field to exist.
    pub field_wait: Duration,
    /// Fixed delay after submitting credentials.
    pub settle_delay: Duration,
    /// Bound on the best-effort waits for navigation between stages.
    pub nav_wait: Duration,
    /// Bound on waiting for a click target to become actionable.
    pub click_wait: Duration,
    /// Bound on waiting for loading overlays to clear.
    pub overlay_wait: Duration,
    /// Bound on dropdown trigger/panel/option waits.
    pub panel_wait: Duration,
    pub poll_interval: Duration,
    /// Appointment sub-category picked in the second dropdown.
    pub category: String,
    /// Form-control name of the location dropdown.
    pub location_control: String,
    /// Placeholder fragment identifying the category dropdown.
    pub category_placeholder: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            entry_url: "https://visa.example.com/login".into(),
            login_fragment: "/login".into(),
            field_wait: Duration::from_secs(30),
            settle_delay: Duration::from_secs(5),
            nav_wait: Duration::from_secs(10),
            click_wait: Duration::from_secs(10),
            overlay_wait: Duration::from_secs(20),
            panel_wait: Duration::from_secs(15),
            poll_interval: Duration::from_millis(200),
            category: "SEAMEN".into(),
            location_control: "centerCode".into(),
            category_placeholder: "sub-category".into(),
        }
    }
}

#[derive(Error, Debug)]
enum StepError {
    #[error("stop requested")]
    Cancelled,

    #[error("{0}")]
    Session(#[from] Error),

    #[error("could not locate {0}")]
    Missing(&'static str),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Clone, Copy)]
enum DropdownLocator<'a> {
    FormControl(&'a str),
    PlaceholderContains(&'a str),
}

/// Run one booking attempt to a classified outcome.
///
/// Step-level faults become `BookingOutcome::Failure` carrying the last
/// obtainable page location; only a stop request rejects the command.
pub fn run(
    session: &mut dyn Session,
    gate: &PauseGate,
    stop: &AtomicBool,
    events: &UnboundedSender<OperatorEvent>,
    cfg: &FlowConfig,
    request: &BookingRequest,
) -> std::result::Result<BookingOutcome, WorkerError> {
    let mut cx = FlowCtx {
        session,
        gate,
        stop,
        events,
        cfg,
    };
    match cx.run_stages(request) {
        Ok(outcome) => {
            info!(user_id = request.user_id, outcome = outcome.label(), "booking attempt finished");
            Ok(outcome)
        }
        Err(StepError::Cancelled) => Err(WorkerError::Cancelled),
        Err(e) => {
            let url = cx.session.current_url().ok();
            warn!(user_id = request.user_id, error = %e, "booking attempt failed");
            Ok(BookingOutcome::Failure {
                reason: e.to_string(),
                url,
            })
        }
    }
}

struct FlowCtx<'a> {
    session: &'a mut dyn Session,
    gate: &'a PauseGate,
    stop: &'a AtomicBool,
    events: &'a UnboundedSender<OperatorEvent>,
    cfg: &'a FlowConfig,
}

impl FlowCtx<'_> {
    fn run_stages(&mut self, request: &BookingRequest) -> Result<BookingOutcome, StepError> {
        // 1. Entry page; dismiss a consent banner if one is up.
        self.checkpoint()?;
        self.session.navigate(&self.cfg.entry_url)?;
        self.dismiss_consent();
        self.checkpoint()?;

        // 2. Unconditional manual checkpoint: the operator confirms access
        //    from a separate tab before automation continues.
        self.pause(
            "new_tab",
            "Open the site in a separate tab to confirm access, then resume.",
        )?;
        match self.session.focus_window_containing(&self.cfg.login_fragment) {
            Ok(true) => debug!("switched to the login window"),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "window switch skipped"),
        }
        self.checkpoint()?;

        // 3. Wait for a credential field to exist at all.
        let field_wait = self.cfg.field_wait;
        self.wait_for(field_wait, "login form", |cx| {
            scan::inputs(cx.session)
                .iter()
                .any(|el| {
                    el.id.as_deref().is_some_and(|id| {
                        LOGIN_FIELD_IDS.contains(&id) || id == PASSWORD_FIELD_ID
                    }) || matches!(el.kind.as_deref(), Some("password") | Some("email"))
                })
                .then_some(())
        })?;

        // 4. The banner sometimes re-renders after the form; dismissing is
        //    idempotent.
        self.dismiss_consent();
        self.checkpoint()?;

        // 5. Challenge before login: hand over to the operator.
        if scan::challenge_present(self.session) {
            self.pause("challenge", "Challenge detected. Solve it, then resume to log in.")?;
        }
        self.checkpoint()?;

        // 6. Locate the credential fields.
        let (login_field, password_field) = self.find_credential_fields()?;
        self.checkpoint()?;

        // 7. Fill and submit.
        self.session.fill(login_field.handle, &request.login)?;
        self.session.fill(password_field.handle, &request.password)?;
        self.submit_credentials(&login_field, &password_field)?;
        self.settle()?;

        // 8. Start a new booking.
        self.click_start_control()?;

        // 9. Best-effort wait for the next stage.
        let url = self.session.current_url().unwrap_or_default();
        self.wait_nav_from(&url);
        self.checkpoint()?;

        // 10. Location, then category.
        let location_control = self.cfg.location_control.clone();
        self.select_dropdown(DropdownLocator::FormControl(&location_control), &request.city)?;
        self.wait_overlays_gone();
        self.checkpoint()?;
        let placeholder = self.cfg.category_placeholder.clone();
        let category = self.cfg.category.clone();
        self.select_dropdown(DropdownLocator::PlaceholderContains(&placeholder), &category)?;

        // 11. Best-effort wait for the final stage.
        let url = self.session.current_url().unwrap_or_default();
        self.wait_nav_from(&url);
        self.checkpoint()?;

        // 12-14. Classify.
        let url = self.session.current_url()?;
        if scan::challenge_present(self.session) {
            return Ok(BookingOutcome::Blocked { url });
        }
        if scan::no_slots_notice(self.session) {
            return Ok(BookingOutcome::NoSlots { url });
        }
        Ok(BookingOutcome::Success { url })
    }

    fn checkpoint(&self) -> Result<(), StepError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(StepError::Cancelled);
        }
        Ok(())
    }

    fn pause(&mut self, kind: &str, message: &str) -> Result<(), StepError> {
        let url = self.session.current_url().unwrap_or_default();
        match self.gate.wait_for_resume(self.events, kind, message, &url) {
            GateWait::Resumed => Ok(()),
            GateWait::Stopped => Err(StepError::Cancelled),
        }
    }

    /// Poll until `f` yields a value, the bound elapses, or stop is signalled.
    fn wait_for<T>(
        &mut self,
        bound: Duration,
        what: &'static str,
        mut f: impl FnMut(&mut Self) -> Option<T>,
    ) -> Result<T, StepError> {
        let deadline = Instant::now() + bound;
        loop {
            self.checkpoint()?;
            if let Some(v) = f(self) {
                return Ok(v);
            }
            if Instant::now() >= deadline {
                return Err(StepError::Timeout(what));
            }
            std::thread::sleep(self.cfg.poll_interval);
        }
    }

    /// Fixed settle delay, interruptible by stop.
    fn settle(&self) -> Result<(), StepError> {
        let deadline = Instant::now() + self.cfg.settle_delay;
        while Instant::now() < deadline {
            self.checkpoint()?;
            std::thread::sleep(self.cfg.poll_interval.min(Duration::from_millis(50)));
        }
        self.checkpoint()
    }

    fn dismiss_consent(&mut self) {
        if let Some(el) = scan::consent_accept_control(self.session) {
            if let Err(e) = self.session.click(el.handle) {
                debug!(error = %e, "consent dismissal skipped");
            }
        }
    }

    fn find_credential_fields(&mut self) -> Result<(Element, Element), StepError> {
        let inputs = scan::inputs(self.session);
        let usable = |el: &&Element| el.visible && el.enabled;

        let login = inputs
            .iter()
            .filter(usable)
            .find(|el| el.id.as_deref().is_some_and(|id| LOGIN_FIELD_IDS.contains(&id)))
            .or_else(|| {
                inputs.iter().filter(usable).find(|el| {
                    matches!(el.kind.as_deref(), Some("text") | Some("email"))
                })
            })
            .cloned()
            .ok_or(StepError::Missing("a visible login field"))?;

        let password = inputs
            .iter()
            .filter(usable)
            .find(|el| el.id_is(PASSWORD_FIELD_ID))
            .or_else(|| {
                inputs
                    .iter()
                    .filter(usable)
                    .find(|el| el.kind.as_deref() == Some("password"))
            })
            .cloned()
            .ok_or(StepError::Missing("a visible password field"))?;

        Ok((login, password))
    }

    fn submit_credentials(
        &mut self,
        login_field: &Element,
        password_field: &Element,
    ) -> Result<(), StepError> {
        let submit = match self.session.form_submit_control(password_field.handle)? {
            Some(el) => Some(el),
            None => self.session.form_submit_control(login_field.handle)?,
        };
        let submit = submit.filter(|el| el.visible && el.enabled).or_else(|| {
            self.session
                .query(SUBMIT_SELECTORS)
                .unwrap_or_default()
                .into_iter()
                .find(|el| el.visible && el.enabled)
        });

        match submit {
            Some(el) => self.safe_click(el.handle),
            None => {
                // Some forms only enable their button after blur; Enter on
                // the password field submits either way.
                debug!("no submit control found, falling back to keyboard submit");
                self.session
                    .submit_via_keyboard(password_field.handle)
                    .map_err(StepError::from)
            }
        }
    }

    fn click_start_control(&mut self) -> Result<(), StepError> {
        let by_id = self
            .session
            .query(START_ID_SELECTORS)
            .unwrap_or_default()
            .into_iter()
            .find(|el| el.visible && el.enabled);
        let control = match by_id {
            Some(el) => Some(el),
            None => self
                .session
                .query(&["button", "a"])
                .unwrap_or_default()
                .into_iter()
                .find(|el| el.visible && el.enabled && el.text_contains(START_TEXT)),
        };
        match control {
            Some(el) => self.safe_click(el.handle),
            None => Err(StepError::Missing("the start-booking control")),
        }
    }

    /// Best-effort wait for the page location to move off `before`.
    fn wait_nav_from(&mut self, before: &str) {
        let deadline = Instant::now() + self.cfg.nav_wait;
        while Instant::now() < deadline && !self.stop.load(Ordering::Acquire) {
            match self.session.current_url() {
                Ok(url) if url != before => return,
                _ => std::thread::sleep(self.cfg.poll_interval),
            }
        }
    }

    fn wait_overlays_gone(&mut self) {
        let deadline = Instant::now() + self.cfg.overlay_wait;
        while Instant::now() < deadline && !self.stop.load(Ordering::Acquire) {
            if !scan::overlays_visible(self.session) {
                return;
            }
            std::thread::sleep(self.cfg.poll_interval);
        }
        // Soft bound: let the click attempt decide what happens next.
    }

    /// Shared click-safety protocol: scroll into view, wait out overlays,
    /// wait until actionable, native click, and on interception clear
    /// overlays once more and fall back to a programmatic click.
    fn safe_click(&mut self, handle: ElementHandle) -> Result<(), StepError> {
        if let Err(e) = self.session.scroll_into_view(handle) {
            debug!(error = %e, "scroll into view skipped");
        }
        self.wait_overlays_gone();
        let click_wait = self.cfg.click_wait;
        self.wait_for(click_wait, "a clickable target", |cx| {
            cx.session
                .refresh(handle)
                .ok()
                .filter(|el| el.actionable())
                .map(|_| ())
        })?;
        match self.session.click(handle) {
            Ok(()) => Ok(()),
            Err(Error::ClickIntercepted) => {
                self.wait_overlays_gone();
                self.session.click_js(handle).map_err(StepError::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn select_dropdown(
        &mut self,
        locator: DropdownLocator<'_>,
        needle: &str,
    ) -> Result<(), StepError> {
        let panel_wait = self.cfg.panel_wait;

        let trigger = self.wait_for(panel_wait, "the dropdown trigger", |cx| match locator {
            DropdownLocator::FormControl(name) => {
                let sel = format!("{DROPDOWN_SELECTOR}[formcontrolname='{name}']");
                cx.session.query(&[sel.as_str()]).ok()?.into_iter().next()
            }
            DropdownLocator::PlaceholderContains(text) => cx
                .session
                .query(&[DROPDOWN_SELECTOR])
                .ok()?
                .into_iter()
                .find(|el| el.text_contains(text)),
        })?;

        // Autofill can keep the select disabled for a while.
        self.wait_for(panel_wait, "the dropdown to enable", |cx| {
            cx.session
                .refresh(trigger.handle)
                .ok()
                .filter(|el| !el.disabled_marker)
                .map(|_| ())
        })?;

        let expanded = self.session.attribute(trigger.handle, "aria-expanded")?;
        if expanded.as_deref() != Some("true") {
            self.safe_click(trigger.handle)?;
        }

        self.wait_for(panel_wait, "the options panel", |cx| {
            let panels = cx.session.query(PANEL_SELECTORS).ok()?;
            panels.iter().any(|el| el.visible).then_some(())
        })?;

        let needle = needle.to_string();
        let option = self.wait_for(panel_wait, "a matching option", |cx| {
            cx.session
                .query(&[OPTION_SELECTOR])
                .ok()?
                .into_iter()
                .find(|el| el.visible && el.text_contains(&needle))
        })?;
        self.safe_click(option.handle)?;

        self.wait_for(panel_wait, "the panel to close", |cx| {
            let panels = cx.session.query(PANEL_SELECTORS).ok()?;
            panels.iter().all(|el| !el.visible).then_some(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, FINAL_URL, LOGIN_URL, booking_site, fast_flow_config};
    use crate::scripted::{ScriptedElement, ScriptedSession};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn request() -> BookingRequest {
        BookingRequest {
            user_id: 1,
            login: "alice@example.com".into(),
            password: "secret".into(),
            city: fixtures::CITY.into(),
        }
    }

    /// Runs the flow on a thread while resuming every pause as it appears.
    fn run_with_auto_resume(
        session: ScriptedSession,
        cfg: FlowConfig,
    ) -> (std::result::Result<BookingOutcome, WorkerError>, ScriptedSession) {
        let gate = Arc::new(PauseGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let flow = {
            let gate = gate.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut session = session;
                let result = run(&mut session, &gate, &stop, &tx, &cfg, &request());
                (result, session)
            })
        };

        while !flow.is_finished() {
            if rx.try_recv().is_ok() {
                while !gate.resume() {
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        flow.join().unwrap()
    }

    #[test]
    fn test_clean_final_stage_classifies_as_success() {
        let (result, session) = run_with_auto_resume(booking_site(true), fast_flow_config());
        assert_eq!(result.unwrap(), BookingOutcome::Success { url: FINAL_URL.into() });
        // Credentials went into the right fields.
        assert_eq!(session.filled.get(&1).map(String::as_str), Some("alice@example.com"));
        assert_eq!(session.filled.get(&2).map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_keyboard_submit_fallback_reaches_success() {
        let (result, _) = run_with_auto_resume(booking_site(false), fast_flow_config());
        assert_eq!(result.unwrap(), BookingOutcome::Success { url: FINAL_URL.into() });
    }

    #[test]
    fn test_no_slots_notice_classifies_as_no_slots() {
        let mut session = booking_site(true);
        session.add_page(FINAL_URL, "No appointment slots are currently available.");
        let (result, _) = run_with_auto_resume(session, fast_flow_config());
        assert_eq!(result.unwrap(), BookingOutcome::NoSlots { url: FINAL_URL.into() });
    }

    #[test]
    fn test_persistent_challenge_classifies_as_blocked() {
        let mut session = booking_site(true);
        session.add_element(
            FINAL_URL,
            ScriptedElement::new(90, "iframe").selector("iframe[src*='recaptcha']"),
        );
        let (result, _) = run_with_auto_resume(session, fast_flow_config());
        assert_eq!(result.unwrap(), BookingOutcome::Blocked { url: FINAL_URL.into() });
    }

    #[test]
    fn test_missing_login_form_times_out_as_failure() {
        let session = ScriptedSession::new(LOGIN_URL);
        let (result, _) = run_with_auto_resume(session, fast_flow_config());
        match result.unwrap() {
            BookingOutcome::Failure { reason, url } => {
                assert!(reason.contains("login form"), "unexpected reason: {reason}");
                assert_eq!(url.as_deref(), Some(LOGIN_URL));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_before_start_rejects_with_cancelled() {
        let gate = PauseGate::new();
        let stop = AtomicBool::new(true);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut session = booking_site(true);
        let result = run(&mut session, &gate, &stop, &tx, &fast_flow_config(), &request());
        assert!(matches!(result, Err(WorkerError::Cancelled)));
    }
}
