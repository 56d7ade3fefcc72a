//! Ambient environment facts
//!
//! [`Environment`] is the capability through which the tracker reads the
//! host page: navigator and screen facts for every envelope, and document
//! facts for page views. [`collect`] turns the former into the
//! [`ContextFields`] merged into `event.params`.

use serde::{Deserialize, Serialize};

/// Document loading state, as exposed by `document.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Loading,
    Interactive,
    #[default]
    Complete,
}

/// Document facts read when a page view is emitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    /// Absolute URL of the current page
    pub location: String,
    /// Empty or absent referrers are reported as null
    pub referrer: Option<String>,
}

/// Read access to the host page
pub trait Environment: Send + Sync {
    fn user_agent(&self) -> String;
    fn language(&self) -> String;
    /// Screen `(width, height)` in CSS pixels
    fn screen_size(&self) -> (u32, u32);
    /// Viewport `(width, height)` in CSS pixels
    fn viewport_size(&self) -> (u32, u32);
    fn ready_state(&self) -> ReadyState;
    fn page(&self) -> PageInfo;
}

/// An environment made of fixed values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEnvironment {
    pub user_agent: String,
    pub language: String,
    pub screen: (u32, u32),
    pub viewport: (u32, u32),
    pub ready_state: ReadyState,
    pub page: PageInfo,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            language: "en-US".to_string(),
            screen: (1920, 1080),
            viewport: (1280, 720),
            ready_state: ReadyState::Complete,
            page: PageInfo {
                title: String::new(),
                location: "http://localhost/".to_string(),
                referrer: None,
            },
        }
    }
}

impl Environment for StaticEnvironment {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    fn page(&self) -> PageInfo {
        self.page.clone()
    }
}

/// Coarse device class derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Mobile,
    Desktop,
}

impl DeviceCategory {
    const MOBILE_MARKERS: [&'static str; 3] = ["mobile", "android", "iphone"];

    /// Case-insensitive match against known mobile markers
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if Self::MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
            DeviceCategory::Mobile
        } else {
            DeviceCategory::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCategory::Mobile => "mobile",
            DeviceCategory::Desktop => "desktop",
        }
    }
}

/// Context fields merged into every envelope's params
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextFields {
    pub user_agent: String,
    pub language: String,
    pub screen_resolution: String,
    pub viewport_size: String,
    pub device_category: DeviceCategory,
}

/// Snapshot the environment at event time
pub fn collect(env: &dyn Environment) -> ContextFields {
    let user_agent = env.user_agent();
    let (sw, sh) = env.screen_size();
    let (vw, vh) = env.viewport_size();

    ContextFields {
        device_category: DeviceCategory::from_user_agent(&user_agent),
        user_agent,
        language: env.language(),
        screen_resolution: format!("{}x{}", sw, sh),
        viewport_size: format!("{}x{}", vw, vh),
    }
}
