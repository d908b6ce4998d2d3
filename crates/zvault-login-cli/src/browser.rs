//! System browser as the provider "popup".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use zvault_login::{PopupFeatures, PopupOpener, PopupWindow};

use crate::{DIM, RESET};

/// Opens provider pages in the default browser, or only prints them.
#[derive(Debug)]
pub struct BrowserOpener {
    launch: bool,
}

impl BrowserOpener {
    pub fn new(launch: bool) -> Self {
        Self { launch }
    }
}

/// A browser tab. The CLI cannot observe or close it; it counts as closed
/// once the login is done with it.
#[derive(Debug, Default)]
struct BrowserTab {
    done: AtomicBool,
}

impl PopupWindow for BrowserTab {
    fn is_closed(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

impl PopupOpener for BrowserOpener {
    fn open(&self, url: &str, name: &str, _features: &PopupFeatures) -> Option<Arc<dyn PopupWindow>> {
        eprintln!();
        eprintln!("  {DIM}Complete the login in your browser. If it does not open, visit:{RESET}");
        eprintln!("  {url}");
        eprintln!();
        if self.launch {
            match open_browser(url) {
                Ok(()) => debug!(name, "browser launched"),
                Err(e) => warn!(error = %e, "could not launch browser"),
            }
        }
        Some(Arc::new(BrowserTab::default()))
    }
}

fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
            .context("failed to open browser")?;
    }
    Ok(())
}
