//! Provider popup lifecycle.
//!
//! The popup is opened through a [`PopupOpener`] (the browser's
//! `window.open`, or the system browser for native hosts) and tracked by a
//! [`PopupHandle`]. Liveness is observed by polling: [`PopupPoller`] ticks
//! once per interval and reports whether the window is still open.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Popup width in CSS pixels.
pub const POPUP_WIDTH: u32 = 500;
/// Popup height in CSS pixels.
pub const POPUP_HEIGHT: u32 = 600;
/// Default liveness poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Size of the screen hosting the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Geometry and chrome of the popup, rendered as a `window.open` features string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i64,
    pub top: i64,
}

impl PopupFeatures {
    /// A fixed-size popup centred on `screen`.
    #[must_use]
    pub fn centered(screen: ScreenSize) -> Self {
        let offset = |outer: u32, inner: u32| (i64::from(outer) - i64::from(inner)) / 2;
        Self {
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
            left: offset(screen.width, POPUP_WIDTH),
            top: offset(screen.height, POPUP_HEIGHT),
        }
    }
}

impl fmt::Display for PopupFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "width={},height={},resizable,scrollbars=yes,top={},left={}",
            self.width, self.height, self.top, self.left
        )
    }
}

/// A window opened for the identity provider.
pub trait PopupWindow: Send + Sync {
    /// Whether the window has been closed, by the user or by [`close`](Self::close).
    fn is_closed(&self) -> bool;

    /// Close the window. Calling it on a closed window must be harmless.
    fn close(&self);
}

/// Opens provider windows.
pub trait PopupOpener: Send + Sync {
    /// Open `url` in a window called `name`.
    ///
    /// Returns `None` when the window could not be opened (for example a
    /// blocked popup).
    fn open(&self, url: &str, name: &str, features: &PopupFeatures)
    -> Option<Arc<dyn PopupWindow>>;
}

/// Shared reference to an opened popup.
#[derive(Clone)]
pub struct PopupHandle {
    window: Arc<dyn PopupWindow>,
    name: String,
}

impl fmt::Debug for PopupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupHandle")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

impl PopupHandle {
    /// Whether the window is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.window.is_closed()
    }

    /// Close the window if it is open. Idempotent.
    pub fn close(&self) {
        if self.is_open() {
            debug!(name = %self.name, "closing provider popup");
            self.window.close();
        }
    }
}

/// Opens, watches and closes provider popups.
#[derive(Clone)]
pub struct PopupManager {
    opener: Arc<dyn PopupOpener>,
    screen: ScreenSize,
    poll_interval: Duration,
}

impl fmt::Debug for PopupManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupManager")
            .field("screen", &self.screen)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PopupManager {
    /// A manager opening centred popups on `screen` and polling every 500 ms.
    pub fn new(opener: Arc<dyn PopupOpener>, screen: ScreenSize) -> Self {
        Self {
            opener,
            screen,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the liveness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open a centred popup on `url`. `None` means the open failed.
    #[must_use]
    pub fn open(&self, url: &str, name: &str) -> Option<PopupHandle> {
        let features = PopupFeatures::centered(self.screen);
        let window = self.opener.open(url, name, &features)?;
        debug!(name, %features, "opened provider popup");
        Some(PopupHandle {
            window,
            name: name.to_owned(),
        })
    }

    /// Start a fresh liveness poll of `handle`.
    #[must_use]
    pub fn poll(&self, handle: &PopupHandle) -> PopupPoller {
        PopupPoller::new(handle.clone(), self.poll_interval)
    }

    /// Close `handle` if there is one. Safe on `None` and on closed windows.
    pub fn close(&self, handle: Option<&PopupHandle>) {
        if let Some(handle) = handle {
            handle.close();
        }
    }
}

/// Lazy, interval-driven view of a popup's liveness.
///
/// The first tick completes one full interval after creation.
#[derive(Debug)]
pub struct PopupPoller {
    handle: PopupHandle,
    interval: Interval,
}

impl PopupPoller {
    fn new(handle: PopupHandle, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { handle, interval }
    }

    /// Wait one interval, then report whether the popup is still open.
    ///
    /// Cancel safe.
    pub async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        self.handle.is_open()
    }

    /// Resolve on the first tick that finds the popup closed.
    pub async fn closed(&mut self) {
        while self.tick().await {}
    }
}
