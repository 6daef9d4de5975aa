//! Headless Chrome screenshot capture via chromiumoxide.
//!
//! Each capture launches its own browser and closes it before returning,
//! so nothing carries over from a failed attempt into the next one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ScreenshotCapturer;
use crate::core::retry::AttemptPolicy;
use crate::domain::{
    classify_navigation_error, JobError, ScreenshotOptions, Target, WaitCondition,
};

const CHROME_ARGS: &[&str] = &[
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--hide-scrollbars",
];

/// A launched browser and the task pumping its CDP events
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: BrowserConfig) -> Result<Self, JobError> {
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| JobError::ResourceExhaustion(format!("failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed to reap browser process");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Screenshot engine backed by a headless Chrome
#[derive(Debug, Clone, Default)]
pub struct ChromeScreenshotter {
    /// Explicit Chrome/Chromium executable; auto-detected when `None`
    chrome_binary: Option<PathBuf>,
}

impl ChromeScreenshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chrome_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            chrome_binary: Some(path.into()),
        }
    }

    fn browser_config(&self, options: &ScreenshotOptions) -> Result<BrowserConfig, JobError> {
        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .window_size(options.width, options.height)
            .args(CHROME_ARGS.to_vec());

        if let Some(binary) = &self.chrome_binary {
            builder = builder.chrome_executable(binary);
        }

        builder
            .build()
            .map_err(|e| JobError::Configuration(format!("invalid browser configuration: {}", e)))
    }

    async fn capture_in(
        session: &BrowserSession,
        target: &Target,
        output: &Path,
        options: &ScreenshotOptions,
        policy: &AttemptPolicy,
    ) -> Result<(), JobError> {
        let page = session
            .browser
            .new_page(target.as_str())
            .await
            .map_err(|e| classify_navigation_error(&e.to_string()))?;

        if policy.wait_condition == WaitCondition::NetworkIdle {
            page.wait_for_navigation()
                .await
                .map_err(|e| classify_navigation_error(&e.to_string()))?;
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(options.full_page)
            .build();

        page.save_screenshot(params, output)
            .await
            .map_err(|e| JobError::TransientAudit(format!("screenshot failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl ScreenshotCapturer for ChromeScreenshotter {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn capture(
        &self,
        target: &Target,
        output: &Path,
        options: &ScreenshotOptions,
        policy: &AttemptPolicy,
    ) -> Result<PathBuf, JobError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                JobError::Configuration(format!(
                    "cannot create screenshot directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let config = self.browser_config(options)?;
        let mut session = BrowserSession::launch(config).await?;
        debug!(target = %target, "Browser launched for screenshot");

        // Close on every path, success or failure
        let captured = Self::capture_in(&session, target, output, options, policy).await;
        session.close().await;
        captured?;

        debug!(target = %target, path = %output.display(), "Screenshot saved");
        Ok(output.to_path_buf())
    }
}
