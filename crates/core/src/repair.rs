//! Stop, clear the build cache, start again.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::state::SupervisorState;
use crate::supervisor::{FatalEvent, FatalSender, ServerControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
	/// The full stop/clear/start sequence ran.
	Completed,
	/// A repair was already running; this call did nothing.
	AlreadyRepairing,
	/// The server could not be started again. Reported as fatal.
	StartFailed,
	/// The monitor is shutting down; the server was left alone.
	ShuttingDown,
}

/// Runs at most one repair at a time. There is no queue: a call made while a
/// repair is running returns immediately.
pub struct RepairCoordinator {
	server: Arc<dyn ServerControl>,
	cache_dir: PathBuf,
	state: Arc<SupervisorState>,
	fatal_tx: FatalSender,
}

impl RepairCoordinator {
	pub fn new(
		server: Arc<dyn ServerControl>,
		cache_dir: PathBuf,
		state: Arc<SupervisorState>,
		fatal_tx: FatalSender,
	) -> Self {
		Self {
			server,
			cache_dir,
			state,
			fatal_tx,
		}
	}

	pub fn cache_dir(&self) -> &Path {
		&self.cache_dir
	}

	pub async fn repair(&self) -> RepairOutcome {
		// Holding the guard also keeps the supervisor from treating the
		// server's exit as fatal.
		let Some(_guard) = self.state.try_begin_repair() else {
			debug!(target = "devmon.repair", "repair already in progress");
			return RepairOutcome::AlreadyRepairing;
		};
		if self.state.is_shutting_down() {
			info!(target = "devmon.repair", "monitor shutting down, skipping repair");
			return RepairOutcome::ShuttingDown;
		}

		warn!(target = "devmon.repair", "critical error detected, initiating self-healing sequence");

		if let Err(err) = self.server.stop().await {
			warn!(target = "devmon.repair", error = %err, "failed to stop server");
		}

		info!(target = "devmon.repair", path = %self.cache_dir.display(), "clearing build cache");
		match clear_cache(&self.cache_dir).await {
			Ok(true) => debug!(target = "devmon.repair", "build cache removed"),
			Ok(false) => debug!(target = "devmon.repair", "no build cache to remove"),
			Err(err) => {
				warn!(target = "devmon.repair", path = %self.cache_dir.display(), error = %err, "failed to clear cache")
			}
		}

		info!(target = "devmon.repair", "restarting server");
		if let Err(err) = self.server.start().await {
			error!(target = "devmon.repair", error = %err, "failed to restart server");
			if err.is_fatal() {
				let _ = self.fatal_tx.send(FatalEvent::SpawnFailed {
					message: err.to_string(),
				});
			}
			return RepairOutcome::StartFailed;
		}

		info!(target = "devmon.repair", "repair complete");
		RepairOutcome::Completed
	}
}

/// Removes the cache directory. `Ok(false)` when there was nothing to remove.
async fn clear_cache(path: &Path) -> std::io::Result<bool> {
	match tokio::fs::remove_dir_all(path).await {
		Ok(()) => Ok(true),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
		Err(err) => Err(err),
	}
}
