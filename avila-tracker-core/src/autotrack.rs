//! Automatic instrumentation of page signals
//!
//! The host feeds DOM and lifecycle signals in as [`PageSignal`]s. The
//! [`AutoTracker`] classifies them into event payloads:
//!
//! | Signal | Event |
//! |--------|-------|
//! | load (or already complete at attach) | `page_view`, once |
//! | click inside a link | `file_download` or `click` |
//! | submit on a form | `form_submit` |
//! | scroll (100 ms trailing debounce) | `scroll` per newly crossed threshold |
//!
//! All state (pending page view, fired scroll thresholds, the debounce
//! timer) belongs to one `AutoTracker`, so independent trackers never share
//! it. Thresholds are one-shot for the lifetime of the instance, which is
//! one page load.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::context::{Environment, ReadyState};
use crate::events::EventKind;

/// Scroll depth milestones, ascending
pub const SCROLL_THRESHOLDS: [u8; 4] = [25, 50, 75, 90];

/// Trailing debounce applied to scroll sampling
pub const SCROLL_DEBOUNCE: Duration = Duration::from_millis(100);

/// Link targets counted as downloads
const DOWNLOAD_EXTENSIONS: [&str; 5] = ["pdf", "zip", "doc", "xls", "ppt"];

/// Maximum characters of link text reported with a click
const ELEMENT_TEXT_LIMIT: usize = 100;

// ============================================
// Signals
// ============================================

/// The parts of a DOM element the tracker looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Tag name, compared case-insensitively
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub href: Option<String>,
    /// `download` attribute; present (even empty) means explicit download
    #[serde(default)]
    pub download: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// An `<a href=...>` element
    pub fn link(href: impl Into<String>) -> Self {
        Self {
            tag: "a".to_string(),
            href: Some(href.into()),
            ..Default::default()
        }
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// Scroll position at sampling time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    /// Full document height
    pub scroll_height: f64,
    /// Visible height
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Rounded percentage of the scrollable distance covered.
    ///
    /// `None` when the page cannot scroll.
    pub fn percent(&self) -> Option<i64> {
        let scrollable = self.scroll_height - self.viewport_height;
        if scrollable <= 0.0 || !scrollable.is_finite() || !self.scroll_y.is_finite() {
            return None;
        }
        Some((self.scroll_y / scrollable * 100.0).round() as i64)
    }
}

/// A DOM or lifecycle signal from the host page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageSignal {
    /// Load completed
    Load,
    /// Click; `path` runs from the target element out to the root
    Click { path: Vec<Element> },
    /// Form submission
    Submit { target: Element },
    /// Scroll with the position at that moment
    Scroll(ScrollMetrics),
}

// ============================================
// Classification
// ============================================

/// Nearest link on a click path, the target itself included
pub fn closest_link(path: &[Element]) -> Option<&Element> {
    path.iter().find(|element| element.is("a"))
}

/// Resolve an href against the page location
fn resolve_href(href: &str, base: &str) -> Option<Url> {
    Url::parse(href)
        .or_else(|_| Url::parse(base).and_then(|base| base.join(href)))
        .ok()
}

/// Final path segment of a link target
fn file_name(resolved: Option<&Url>, raw_href: &str) -> String {
    match resolved {
        Some(url) => match url.path_segments() {
            Some(mut segments) => segments.next_back().unwrap_or_default().to_string(),
            // cannot-be-a-base URLs such as `mailto:` have an opaque path
            None => url.path().rsplit('/').next().unwrap_or_default().to_string(),
        },
        None => {
            let path = raw_href.split(['?', '#']).next().unwrap_or_default();
            path.rsplit('/').next().unwrap_or_default().to_string()
        }
    }
}

/// Whether a path ends in one of the download extensions (case-insensitive)
fn has_download_extension(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => DOWNLOAD_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known)),
        None => false,
    }
}

/// Classify a click on `link` as a download or a plain click
pub fn classify_link(link: &Element, page_location: &str) -> EventKind {
    let raw_href = link.href.clone().unwrap_or_default();
    let resolved = link
        .href
        .as_deref()
        .and_then(|href| resolve_href(href, page_location));

    let target_path = match &resolved {
        Some(url) => url.path().to_string(),
        None => raw_href
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let link_url = resolved.as_ref().map(Url::to_string);

    if link.download.is_some() || has_download_extension(&target_path) {
        let file_name = file_name(resolved.as_ref(), &raw_href);
        let file_extension = file_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string();

        return EventKind::FileDownload {
            file_name,
            file_extension,
            link_url: link_url.unwrap_or(raw_href),
        };
    }

    let text: String = link.text_content.chars().take(ELEMENT_TEXT_LIMIT).collect();
    EventKind::Click {
        element_id: non_empty(&link.id),
        element_class: non_empty(&link.class_name),
        element_text: non_empty(&text),
        link_url: link_url.or(link.href.clone().filter(|href| !href.is_empty())),
    }
}

/// A click produces an event only when it lands inside a link
pub fn classify_click(path: &[Element], page_location: &str) -> Option<EventKind> {
    closest_link(path).map(|link| classify_link(link, page_location))
}

/// Submissions count only when the target is a form
pub fn classify_submit(target: &Element) -> Option<EventKind> {
    if !target.is("form") {
        return None;
    }
    Some(EventKind::FormSubmit {
        form_id: non_empty(&target.id).unwrap_or_else(|| "unknown".to_string()),
        form_name: non_empty(&target.name),
    })
}

/// Page view payload from the current document
pub fn page_view(env: &dyn Environment) -> EventKind {
    let page = env.page();
    EventKind::PageView {
        page_title: page.title,
        page_location: page.location,
        page_referrer: page.referrer.filter(|referrer| !referrer.is_empty()),
        user_id: None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ============================================
// Scroll thresholds
// ============================================

/// Which scroll milestones have fired on this page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollThresholds {
    fired: [bool; SCROLL_THRESHOLDS.len()],
}

impl ScrollThresholds {
    /// Mark every not-yet-fired threshold at or below `percent` and return them ascending
    pub fn record(&mut self, percent: i64) -> Vec<u8> {
        let mut crossed = Vec::new();
        for (idx, threshold) in SCROLL_THRESHOLDS.iter().enumerate() {
            if percent >= i64::from(*threshold) && !self.fired[idx] {
                self.fired[idx] = true;
                crossed.push(*threshold);
            }
        }
        crossed
    }

    pub fn has_fired(&self, threshold: u8) -> bool {
        SCROLL_THRESHOLDS
            .iter()
            .position(|t| *t == threshold)
            .map(|idx| self.fired[idx])
            .unwrap_or(false)
    }
}

// ============================================
// Debounce
// ============================================

/// Trailing debounce on the tokio timer.
///
/// Each `schedule` cancels the previous pending call. Outside a tokio
/// runtime there is no timer, so the call runs immediately.
pub struct Debouncer<T> {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<T>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Run `f` after `delay` of quiet; returns its result only when run inline
    pub fn schedule<F>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Some(f());
        };

        let delay = self.delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            f()
        });

        if let Some(previous) = self.lock().replace(task) {
            previous.abort();
        }
        None
    }

    /// Wait for the pending call, if any, and return its result
    pub async fn settle(&self) -> Option<T> {
        let task = self.lock().take()?;
        task.await.ok()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<T>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================
// Auto tracker
// ============================================

#[derive(Debug, Default)]
struct AutoTrackState {
    attached: bool,
    page_view_pending: bool,
    thresholds: ScrollThresholds,
}

/// What the tracker should do with a signal
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Emit these payloads now
    Emit(Vec<EventKind>),
    /// Sample these metrics once scrolling settles
    SampleLater(ScrollMetrics),
    /// Nothing to report
    Ignore,
}

/// Per-page auto-instrumentation state machine
pub struct AutoTracker {
    enabled: bool,
    state: Mutex<AutoTrackState>,
}

impl AutoTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(AutoTrackState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// Register on the page. Returns the page view payload when the document
    /// is already complete; otherwise the page view waits for [`PageSignal::Load`].
    pub fn attach(&self, env: &dyn Environment) -> Option<EventKind> {
        if !self.enabled {
            return None;
        }
        let mut state = self.lock();
        if state.attached {
            return None;
        }
        state.attached = true;

        if env.ready_state() == ReadyState::Complete {
            Some(page_view(env))
        } else {
            state.page_view_pending = true;
            None
        }
    }

    /// Classify one signal
    pub fn on_signal(&self, signal: &PageSignal, env: &dyn Environment) -> Reaction {
        if !self.enabled || !self.is_attached() {
            return Reaction::Ignore;
        }

        match signal {
            PageSignal::Load => {
                let mut state = self.lock();
                if state.page_view_pending {
                    state.page_view_pending = false;
                    Reaction::Emit(vec![page_view(env)])
                } else {
                    Reaction::Ignore
                }
            }
            PageSignal::Click { path } => match classify_click(path, &env.page().location) {
                Some(kind) => Reaction::Emit(vec![kind]),
                None => Reaction::Ignore,
            },
            PageSignal::Submit { target } => match classify_submit(target) {
                Some(kind) => Reaction::Emit(vec![kind]),
                None => Reaction::Ignore,
            },
            PageSignal::Scroll(metrics) => Reaction::SampleLater(*metrics),
        }
    }

    /// Scroll events for thresholds newly crossed at `metrics`
    pub fn sample_scroll(&self, metrics: &ScrollMetrics) -> Vec<EventKind> {
        let Some(percent) = metrics.percent() else {
            return Vec::new();
        };
        self.lock()
            .thresholds
            .record(percent)
            .into_iter()
            .map(|percent_scrolled| EventKind::Scroll { percent_scrolled })
            .collect()
    }

    /// Snapshot of fired thresholds
    pub fn thresholds(&self) -> ScrollThresholds {
        self.lock().thresholds.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AutoTrackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PageInfo, StaticEnvironment};

    const PAGE: &str = "https://x.test/docs/index.html";

    fn env_with(ready_state: ReadyState) -> StaticEnvironment {
        StaticEnvironment {
            ready_state,
            page: PageInfo {
                title: "Docs".to_string(),
                location: PAGE.to_string(),
                referrer: Some(String::new()),
            },
            ..Default::default()
        }
    }

    fn metrics(percent: f64) -> ScrollMetrics {
        // 1000px of scrollable distance
        ScrollMetrics {
            scroll_y: percent * 10.0,
            scroll_height: 1800.0,
            viewport_height: 800.0,
        }
    }

    #[test]
    fn test_relative_pdf_is_download() {
        let kind = classify_link(&Element::link("/files/report.pdf"), PAGE);
        assert_eq!(
            kind,
            EventKind::FileDownload {
                file_name: "report.pdf".to_string(),
                file_extension: "pdf".to_string(),
                link_url: "https://x.test/files/report.pdf".to_string(),
            }
        );
    }

    #[test]
    fn test_plain_link_is_click() {
        let mut link = Element::link("/about");
        link.id = "nav-about".to_string();
        link.text_content = "About us".to_string();

        let kind = classify_link(&link, PAGE);
        assert_eq!(
            kind,
            EventKind::Click {
                element_id: Some("nav-about".to_string()),
                element_class: None,
                element_text: Some("About us".to_string()),
                link_url: Some("https://x.test/about".to_string()),
            }
        );
    }

    #[test]
    fn test_download_extension_is_case_insensitive_and_ignores_query() {
        let kind = classify_link(&Element::link("https://cdn.test/Q3.XLS?v=2"), PAGE);
        match kind {
            EventKind::FileDownload {
                file_name,
                file_extension,
                ..
            } => {
                assert_eq!(file_name, "Q3.XLS");
                assert_eq!(file_extension, "XLS");
            }
            other => panic!("expected download, got {:?}", other),
        }

        // docx is not in the list
        assert_eq!(
            classify_link(&Element::link("/a.docx"), PAGE).event_type(),
            "click"
        );
    }

    #[test]
    fn test_download_attribute_forces_download() {
        let mut link = Element::link("/export");
        link.download = Some(String::new());

        match classify_link(&link, PAGE) {
            EventKind::FileDownload {
                file_name,
                file_extension,
                link_url,
            } => {
                assert_eq!(file_name, "export");
                assert_eq!(file_extension, "export");
                assert_eq!(link_url, "https://x.test/export");
            }
            other => panic!("expected download, got {:?}", other),
        }
    }

    #[test]
    fn test_opaque_url_keeps_file_name() {
        let link = Element::link("mailto:a@b.pdf");

        match classify_link(&link, PAGE) {
            EventKind::FileDownload {
                file_name,
                file_extension,
                link_url,
            } => {
                assert_eq!(file_name, "a@b.pdf");
                assert_eq!(file_extension, "pdf");
                assert_eq!(link_url, "mailto:a@b.pdf");
            }
            other => panic!("expected download, got {:?}", other),
        }
    }

    #[test]
    fn test_click_text_truncated_to_100_chars() {
        let mut link = Element::link("/long");
        link.text_content = "é".repeat(150);

        match classify_link(&link, PAGE) {
            EventKind::Click { element_text, .. } => {
                assert_eq!(element_text.unwrap().chars().count(), 100);
            }
            other => panic!("expected click, got {:?}", other),
        }
    }

    #[test]
    fn test_click_uses_nearest_link_ancestor() {
        let span = Element::new("span");
        let mut link = Element::link("/pricing");
        link.class_name = "btn".to_string();
        let body = Element::new("body");

        let kind = classify_click(&[span, link, body], PAGE).unwrap();
        assert_eq!(kind.event_type(), "click");

        assert!(classify_click(&[Element::new("div")], PAGE).is_none());
    }

    #[test]
    fn test_submit_classification() {
        let mut form = Element::new("FORM");
        form.name = "signup".to_string();
        assert_eq!(
            classify_submit(&form),
            Some(EventKind::FormSubmit {
                form_id: "unknown".to_string(),
                form_name: Some("signup".to_string()),
            })
        );
        assert!(classify_submit(&Element::new("div")).is_none());
    }

    #[test]
    fn test_scroll_percent() {
        assert_eq!(metrics(10.0).percent(), Some(10));
        assert_eq!(metrics(24.6).percent(), Some(25));
        let flat = ScrollMetrics {
            scroll_y: 0.0,
            scroll_height: 800.0,
            viewport_height: 800.0,
        };
        assert_eq!(flat.percent(), None);
    }

    #[test]
    fn test_thresholds_fire_once_each() {
        let mut thresholds = ScrollThresholds::default();
        let mut fired = Vec::new();
        for percent in [10, 30, 30, 60, 95, 95, 40] {
            fired.extend(thresholds.record(percent));
        }
        assert_eq!(fired, vec![25, 50, 75, 90]);
        assert!(thresholds.has_fired(90));
    }

    #[test]
    fn test_jump_fires_several_thresholds_ascending() {
        let mut thresholds = ScrollThresholds::default();
        assert_eq!(thresholds.record(80), vec![25, 50, 75]);
        assert_eq!(thresholds.record(100), vec![90]);
    }

    #[test]
    fn test_page_view_immediate_when_complete() {
        let auto = AutoTracker::new(true);
        let env = env_with(ReadyState::Complete);

        let kind = auto.attach(&env).unwrap();
        assert_eq!(
            kind,
            EventKind::PageView {
                page_title: "Docs".to_string(),
                page_location: PAGE.to_string(),
                page_referrer: None,
                user_id: None,
            }
        );
        assert_eq!(auto.on_signal(&PageSignal::Load, &env), Reaction::Ignore);
        assert!(auto.attach(&env).is_none());
    }

    #[test]
    fn test_page_view_waits_for_load_and_fires_once() {
        let auto = AutoTracker::new(true);
        let env = env_with(ReadyState::Loading);

        assert!(auto.attach(&env).is_none());
        match auto.on_signal(&PageSignal::Load, &env) {
            Reaction::Emit(kinds) => assert_eq!(kinds.len(), 1),
            other => panic!("expected page view, got {:?}", other),
        }
        assert_eq!(auto.on_signal(&PageSignal::Load, &env), Reaction::Ignore);
    }

    #[test]
    fn test_disabled_or_detached_ignores_signals() {
        let env = env_with(ReadyState::Complete);
        let click = PageSignal::Click {
            path: vec![Element::link("/about")],
        };

        let disabled = AutoTracker::new(false);
        assert!(disabled.attach(&env).is_none());
        assert_eq!(disabled.on_signal(&click, &env), Reaction::Ignore);

        let detached = AutoTracker::new(true);
        assert_eq!(detached.on_signal(&click, &env), Reaction::Ignore);
    }

    #[test]
    fn test_signals_deserialize_from_json() {
        let line = r#"{"type":"click","path":[{"tag":"a","id":"cta","href":"https://x.test/download.zip"}]}"#;
        let signal: PageSignal = serde_json::from_str(line).unwrap();
        match signal {
            PageSignal::Click { path } => assert_eq!(path[0].id, "cta"),
            other => panic!("unexpected {:?}", other),
        }

        let line = r#"{"type":"scroll","scroll_y":500,"scroll_height":1800,"viewport_height":800}"#;
        let signal: PageSignal = serde_json::from_str(line).unwrap();
        assert_eq!(signal, PageSignal::Scroll(metrics(50.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_keeps_only_last_call() {
        let debouncer = Debouncer::new(SCROLL_DEBOUNCE);
        assert!(debouncer.schedule(|| 1).is_none());
        assert!(debouncer.schedule(|| 2).is_none());
        assert!(debouncer.is_pending());

        assert_eq!(debouncer.settle().await, Some(2));
        assert_eq!(debouncer.settle().await, None);
    }

    #[test]
    fn test_debouncer_runs_inline_without_runtime() {
        let debouncer = Debouncer::new(SCROLL_DEBOUNCE);
        assert_eq!(debouncer.schedule(|| 7), Some(7));
        assert!(!debouncer.is_pending());
    }
}
