//! Browser-driven health checks.
//!
//! A [`BrowserProbe`] owns one long-lived browser session created on the first
//! check. Each check opens a single page, waits for the network to settle and
//! classifies what the page reported. A failed check runs the repair sequence
//! before it lets go of the check guard.

mod chromium;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use chromium::{ChromiumBackend, ChromiumSession};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::repair::{RepairCoordinator, RepairOutcome};
use crate::state::SupervisorState;
use crate::verdict::{ErrorMarkers, HealthVerdict, PageLoad};

/// Launches browser sessions.
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
	type Session: PageSession;

	async fn launch(&self) -> Result<Self::Session>;
}

/// A live browser session that loads one page at a time.
#[async_trait]
pub trait PageSession: Send + 'static {
	/// Opens a fresh page, navigates to `url`, collects error events until the
	/// network goes quiet or `timeout` elapses, then closes the page.
	///
	/// Returns an error only when no page could be opened. Navigation
	/// failures are reported through [`PageLoad::navigation_error`].
	async fn load(&mut self, url: &str, timeout: Duration) -> Result<PageLoad>;

	async fn close(&mut self) -> Result<()>;
}

/// What a call to [`HealthCheck::check_health`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
	/// Another check or a repair held the guard; nothing was done.
	Skipped,
	/// The browser or the page could not be opened.
	Abandoned,
	Passed,
	/// The page was unhealthy and the repair sequence was invoked.
	Failed {
		verdict: HealthVerdict,
		repair: RepairOutcome,
	},
}

/// Anything that can run an on-demand health check.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
	async fn check_health(&self) -> CheckOutcome;
}

pub struct BrowserProbe<B: BrowserBackend> {
	backend: B,
	session: Mutex<Option<B::Session>>,
	closed: AtomicBool,
	url: String,
	timeout: Duration,
	markers: ErrorMarkers,
	state: Arc<SupervisorState>,
	repair: Arc<RepairCoordinator>,
}

impl<B: BrowserBackend> BrowserProbe<B> {
	pub fn new(
		backend: B,
		config: &MonitorConfig,
		state: Arc<SupervisorState>,
		repair: Arc<RepairCoordinator>,
	) -> Self {
		Self {
			backend,
			session: Mutex::new(None),
			closed: AtomicBool::new(false),
			url: config.server_url(),
			timeout: config.navigation_timeout(),
			markers: ErrorMarkers::new(config.error_markers.iter().cloned()),
			state,
			repair,
		}
	}

	pub async fn has_session(&self) -> bool {
		self.session.lock().await.is_some()
	}

	/// Loads the page once. `None` means the check had to be abandoned.
	async fn load_page(&self) -> Option<PageLoad> {
		let mut slot = self.session.lock().await;
		if slot.is_none() {
			match self.backend.launch().await {
				Ok(session) => {
					info!(target = "devmon.probe", "browser session started");
					*slot = Some(session);
				}
				Err(err) => {
					warn!(target = "devmon.probe", error = %err, "failed to launch browser");
					return None;
				}
			}
		}
		let session = slot.as_mut()?;

		match session.load(&self.url, self.timeout).await {
			Ok(load) => Some(load),
			Err(err) => {
				warn!(target = "devmon.probe", error = %err, "failed to create page");
				None
			}
		}
	}

	/// Closes the browser session, if one was ever opened. Later checks are
	/// skipped instead of launching a new browser.
	pub async fn shutdown(&self) {
		self.closed.store(true, Ordering::SeqCst);
		let session = self.session.lock().await.take();
		if let Some(mut session) = session {
			match session.close().await {
				Ok(()) => info!(target = "devmon.probe", "browser closed"),
				Err(err) => warn!(target = "devmon.probe", error = %err, "failed to close browser"),
			}
		}
	}
}

#[async_trait]
impl<B: BrowserBackend> HealthCheck for BrowserProbe<B> {
	async fn check_health(&self) -> CheckOutcome {
		let Some(_guard) = self.state.try_begin_check() else {
			debug!(
				target = "devmon.probe",
				checking = self.state.is_checking(),
				repairing = self.state.is_repairing(),
				"check already in progress, skipping"
			);
			return CheckOutcome::Skipped;
		};

		if self.closed.load(Ordering::SeqCst) || self.state.is_shutting_down() {
			debug!(target = "devmon.probe", "probe shut down, skipping check");
			return CheckOutcome::Skipped;
		}

		let Some(load) = self.load_page().await else {
			return CheckOutcome::Abandoned;
		};

		if let Some(message) = load.navigation_error.as_deref() {
			if load.connection_refused() {
				debug!(target = "devmon.probe", url = %self.url, "server not reachable yet");
			} else {
				warn!(target = "devmon.probe", url = %self.url, error = message, "navigation warning");
			}
		}

		let verdict = HealthVerdict::classify(&load, &self.markers);
		if !verdict.failed {
			info!(target = "devmon.probe", status = ?load.status, "health check passed");
			return CheckOutcome::Passed;
		}

		warn!(target = "devmon.probe", count = verdict.diagnostics.len(), "errors detected on page reload");
		for diagnostic in &verdict.diagnostics {
			warn!(target = "devmon.probe", "  - {diagnostic}");
		}

		// Shutdown may have started while the page was loading.
		if self.closed.load(Ordering::SeqCst) || self.state.is_shutting_down() {
			info!(target = "devmon.probe", "monitor shutting down, not repairing");
			return CheckOutcome::Failed {
				verdict,
				repair: RepairOutcome::ShuttingDown,
			};
		}

		let repair = self.repair.repair().await;
		CheckOutcome::Failed { verdict, repair }
	}
}
