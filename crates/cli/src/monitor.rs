//! Wires the monitor together and owns its lifetime.
//!
//! Startup binds the `/notify` listener first, then starts the dev server.
//! After that the process waits for a shutdown signal or a fatal supervisor
//! event, and tears everything down in a fixed order: refuse new work, let
//! any running check or repair finish, then browser, server, listener. The
//! returned value is the process exit code.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use devmon::{
	BrowserProbe, ChromiumBackend, FatalEvent, HealthCheck, MonitorConfig, ProcessSupervisor, RepairCoordinator,
	ServerControl, SupervisorState, TriggerListener, fatal_channel,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Shutdown signals the monitor reacts to.
struct Signals {
	#[cfg(unix)]
	sigint: tokio::signal::unix::Signal,
	#[cfg(unix)]
	sigterm: tokio::signal::unix::Signal,
}

impl Signals {
	#[cfg(unix)]
	fn install() -> Result<Self> {
		use tokio::signal::unix::{SignalKind, signal};

		Ok(Self {
			sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
			sigterm: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
		})
	}

	#[cfg(not(unix))]
	fn install() -> Result<Self> {
		Ok(Self {})
	}

	/// Resolves with the signal's name once one arrives.
	#[cfg(unix)]
	async fn recv(&mut self) -> &'static str {
		tokio::select! {
			_ = self.sigint.recv() => "SIGINT",
			_ = self.sigterm.recv() => "SIGTERM",
		}
	}

	#[cfg(not(unix))]
	async fn recv(&mut self) -> &'static str {
		if let Err(err) = tokio::signal::ctrl_c().await {
			warn!(target = "devmon", error = %err, "failed to listen for Ctrl+C");
			std::future::pending::<()>().await;
		}
		"Ctrl+C"
	}
}

struct Monitor {
	state: Arc<SupervisorState>,
	supervisor: Arc<ProcessSupervisor>,
	probe: Arc<BrowserProbe<ChromiumBackend>>,
	listener_stop: Option<oneshot::Sender<()>>,
	listener_task: Option<JoinHandle<devmon::Result<()>>>,
	idle_limit: Duration,
}

/// Runs the monitor until a signal or a fatal event, returning the exit code.
pub async fn run(config: MonitorConfig) -> Result<i32> {
	let mut signals = Signals::install()?;

	let state = SupervisorState::new();
	let (fatal_tx, mut fatal_rx) = fatal_channel();
	let supervisor = Arc::new(ProcessSupervisor::new(&config, Arc::clone(&state), fatal_tx.clone()));
	let repair = Arc::new(RepairCoordinator::new(
		Arc::clone(&supervisor) as Arc<dyn ServerControl>,
		config.cache_path(),
		Arc::clone(&state),
		fatal_tx,
	));
	let probe = Arc::new(BrowserProbe::new(
		ChromiumBackend::from_config(&config),
		&config,
		Arc::clone(&state),
		repair,
	));

	let listener = TriggerListener::bind(
		&config.listener_addr(),
		Arc::clone(&probe) as Arc<dyn HealthCheck>,
		config.notify_delay(),
	)
	.await
	.context("Failed to start trigger listener")?;

	let (stop_tx, stop_rx) = oneshot::channel::<()>();
	let listener_task = tokio::spawn(listener.serve(async move {
		let _ = stop_rx.await;
	}));

	let mut monitor = Monitor {
		state,
		supervisor,
		probe,
		listener_stop: Some(stop_tx),
		listener_task: Some(listener_task),
		idle_limit: config.navigation_timeout() + config.stop_grace() + config.startup_settle() + Duration::from_secs(1),
	};

	info!(
		target = "devmon",
		command = %config.server_command,
		root = %config.root().display(),
		"starting dev server"
	);
	let started = tokio::select! {
		result = monitor.supervisor.start() => Some(result),
		signal = signals.recv() => {
			info!(target = "devmon", signal, "received signal during startup, shutting down");
			None
		}
	};
	match started {
		None => {
			monitor.teardown().await;
			return Ok(0);
		}
		Some(Err(err)) => {
			error!(target = "devmon", error = %err, "failed to start dev server");
			monitor.teardown().await;
			return Ok(1);
		}
		Some(Ok(())) => {}
	}

	info!(target = "devmon", url = %config.server_url(), "ready");

	let code = tokio::select! {
		signal = signals.recv() => {
			info!(target = "devmon", signal, "received signal, shutting down");
			0
		}
		event = fatal_rx.recv() => match event {
			Some(FatalEvent::ServerExited { code }) => {
				error!(target = "devmon", code, "dev server exited unexpectedly");
				code
			}
			Some(FatalEvent::SpawnFailed { message }) => {
				error!(target = "devmon", error = %message, "dev server could not be restarted");
				1
			}
			None => {
				warn!(target = "devmon", "fatal event channel closed");
				1
			}
		},
	};

	monitor.teardown().await;
	Ok(code)
}

impl Monitor {
	async fn teardown(&mut self) {
		// From here on no check starts and the server is never spawned again.
		self.state.begin_shutdown();
		if !wait_until_idle(&self.state, self.idle_limit).await {
			warn!(target = "devmon", "check or repair still running, shutting down anyway");
		}

		self.probe.shutdown().await;

		if let Err(err) = self.supervisor.stop().await {
			warn!(target = "devmon", error = %err, "failed to stop dev server");
		}

		if let Some(stop) = self.listener_stop.take() {
			let _ = stop.send(());
		}
		if let Some(task) = self.listener_task.take() {
			match task.await {
				Ok(Ok(())) => debug!(target = "devmon", "trigger listener stopped"),
				Ok(Err(err)) => warn!(target = "devmon", error = %err, "trigger listener failed"),
				Err(err) => warn!(target = "devmon", error = %err, "trigger listener task panicked"),
			}
		}
		info!(target = "devmon", "monitor stopped");
	}
}

/// Waits until neither a check nor a repair is running. Returns `false` if
/// `limit` ran out first.
async fn wait_until_idle(state: &SupervisorState, limit: Duration) -> bool {
	let deadline = tokio::time::Instant::now() + limit;
	while state.is_busy() {
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		debug!(
			target = "devmon",
			checking = state.is_checking(),
			repairing = state.is_repairing(),
			"waiting for in-flight work"
		);
		tokio::time::sleep(IDLE_POLL).await;
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn idle_state_needs_no_wait() {
		let state = SupervisorState::new();
		assert!(wait_until_idle(&state, Duration::ZERO).await);
	}

	#[tokio::test(start_paused = true)]
	async fn waits_until_repair_guard_drops() {
		let state = SupervisorState::new();
		let guard = state.try_begin_repair().unwrap();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(350)).await;
			drop(guard);
		});

		assert!(wait_until_idle(&state, Duration::from_secs(5)).await);
		assert!(!state.is_repairing());
	}

	#[tokio::test(start_paused = true)]
	async fn waits_for_running_check_too() {
		let state = SupervisorState::new();
		let guard = state.try_begin_check().unwrap();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(3)).await;
			drop(guard);
		});

		let started = tokio::time::Instant::now();
		assert!(wait_until_idle(&state, Duration::from_secs(10)).await);
		assert!(started.elapsed() >= Duration::from_secs(3));
		assert!(!state.is_checking());
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_after_limit() {
		let state = SupervisorState::new();
		let _guard = state.try_begin_repair().unwrap();
		assert!(!wait_until_idle(&state, Duration::from_millis(500)).await);
	}
}
