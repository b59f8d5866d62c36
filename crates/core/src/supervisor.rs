//! Dev-server child process lifecycle.
//!
//! The server runs through the platform shell in its own process group so an
//! interrupt reaches the whole tree (`npm` and whatever it spawns). Each spawn
//! gets a watcher task that owns the [`Child`], publishes its exit status and
//! applies the fatal-exit policy.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::state::SupervisorState;

const READY_POLL: Duration = Duration::from_millis(250);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Start/stop surface the repair coordinator drives.
#[async_trait]
pub trait ServerControl: Send + Sync {
	/// Starts the server unless it is already running.
	async fn start(&self) -> Result<()>;

	/// Stops the server if it is running.
	async fn stop(&self) -> Result<()>;
}

/// Exit of a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
	pub pid: u32,
	/// `None` when the child was terminated by a signal.
	pub code: Option<i32>,
}

/// Conditions that must terminate the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalEvent {
	/// The server died outside a repair and without being asked to stop.
	ServerExited { code: i32 },
	/// The server command could not be spawned during a repair.
	SpawnFailed { message: String },
}

pub type FatalSender = mpsc::UnboundedSender<FatalEvent>;
pub type FatalReceiver = mpsc::UnboundedReceiver<FatalEvent>;

pub fn fatal_channel() -> (FatalSender, FatalReceiver) {
	mpsc::unbounded_channel()
}

/// How the settle wait after a spawn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
	Listening,
	Exited,
	TimedOut,
}

struct ServerHandle {
	pid: u32,
	exit_rx: watch::Receiver<Option<ChildExit>>,
	stop_requested: Arc<AtomicBool>,
	kill_tx: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
	fn is_live(&self) -> bool {
		self.exit_rx.borrow().is_none()
	}

	fn exit(&self) -> Option<ChildExit> {
		*self.exit_rx.borrow()
	}
}

pub struct ProcessSupervisor {
	command: String,
	root: PathBuf,
	ready_addr: String,
	settle: Duration,
	grace: Duration,
	state: Arc<SupervisorState>,
	fatal_tx: FatalSender,
	handle: Mutex<Option<ServerHandle>>,
}

impl ProcessSupervisor {
	pub fn new(config: &MonitorConfig, state: Arc<SupervisorState>, fatal_tx: FatalSender) -> Self {
		Self {
			command: config.server_command.clone(),
			root: config.root(),
			ready_addr: format!("{}:{}", config.server_host, config.server_port),
			settle: config.startup_settle(),
			grace: config.stop_grace(),
			state,
			fatal_tx,
			handle: Mutex::new(None),
		}
	}

	pub async fn is_running(&self) -> bool {
		self.handle
			.lock()
			.await
			.as_ref()
			.is_some_and(ServerHandle::is_live)
	}

	pub async fn pid(&self) -> Option<u32> {
		self.handle
			.lock()
			.await
			.as_ref()
			.filter(|h| h.is_live())
			.map(|h| h.pid)
	}

	/// Exit of the current handle, if its child has already terminated.
	pub async fn last_exit(&self) -> Option<ChildExit> {
		self.handle.lock().await.as_ref().and_then(ServerHandle::exit)
	}

	fn spawn(&self) -> Result<ServerHandle> {
		let mut cmd = shell_command(&self.command);
		cmd.current_dir(&self.root)
			.stdin(Stdio::null())
			.stdout(Stdio::inherit())
			.stderr(Stdio::inherit());
		#[cfg(unix)]
		cmd.process_group(0);

		let child = cmd.spawn().map_err(|source| Error::Spawn {
			command: self.command.clone(),
			source,
		})?;
		let pid = child.id().unwrap_or_default();

		let (exit_tx, exit_rx) = watch::channel(None);
		let (kill_tx, kill_rx) = oneshot::channel();
		let stop_requested = Arc::new(AtomicBool::new(false));

		tokio::spawn(watch_child(
			child,
			pid,
			exit_tx,
			kill_rx,
			Arc::clone(&stop_requested),
			Arc::clone(&self.state),
			self.fatal_tx.clone(),
		));

		Ok(ServerHandle {
			pid,
			exit_rx,
			stop_requested,
			kill_tx: Some(kill_tx),
		})
	}

	/// Polls the server port until it accepts a connection, the child exits,
	/// or the settle period runs out.
	async fn wait_until_ready(&self, exit_rx: &mut watch::Receiver<Option<ChildExit>>) -> Readiness {
		let deadline = Instant::now() + self.settle;
		loop {
			if exit_rx.borrow().is_some() {
				return Readiness::Exited;
			}
			if let Ok(Ok(_)) = tokio::time::timeout(READY_POLL, TcpStream::connect(&self.ready_addr)).await {
				return Readiness::Listening;
			}
			let now = Instant::now();
			if now >= deadline {
				return Readiness::TimedOut;
			}
			let pause = READY_POLL.min(deadline - now);
			tokio::select! {
				_ = tokio::time::sleep(pause) => {}
				_ = exit_rx.changed() => {}
			}
		}
	}
}

#[async_trait]
impl ServerControl for ProcessSupervisor {
	async fn start(&self) -> Result<()> {
		let mut slot = self.handle.lock().await;
		if let Some(handle) = slot.as_ref().filter(|h| h.is_live()) {
			debug!(target = "devmon.supervisor", pid = handle.pid, "server already running");
			return Ok(());
		}
		if self.state.is_shutting_down() {
			debug!(target = "devmon.supervisor", "monitor shutting down, not starting server");
			return Ok(());
		}

		info!(target = "devmon.supervisor", command = %self.command, root = %self.root.display(), "starting dev server");
		let handle = self.spawn()?;
		let pid = handle.pid;
		let mut exit_rx = handle.exit_rx.clone();
		*slot = Some(handle);

		info!(target = "devmon.supervisor", pid, addr = %self.ready_addr, "waiting for server to be ready");
		match self.wait_until_ready(&mut exit_rx).await {
			Readiness::Listening => {
				info!(target = "devmon.supervisor", pid, addr = %self.ready_addr, "server is accepting connections")
			}
			Readiness::Exited => warn!(target = "devmon.supervisor", pid, "server exited before it started listening"),
			Readiness::TimedOut => warn!(
				target = "devmon.supervisor",
				pid,
				settle_ms = self.settle.as_millis() as u64,
				"server not listening yet, continuing"
			),
		}
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		let mut slot = self.handle.lock().await;
		let Some(mut handle) = slot.take() else {
			return Ok(());
		};
		if !handle.is_live() {
			debug!(target = "devmon.supervisor", pid = handle.pid, "server already exited");
			return Ok(());
		}

		info!(target = "devmon.supervisor", pid = handle.pid, "stopping server");
		handle.stop_requested.store(true, Ordering::SeqCst);
		interrupt(&mut handle);

		let mut exit_rx = handle.exit_rx.clone();
		let exited = tokio::time::timeout(self.grace, exit_rx.wait_for(Option::is_some))
			.await
			.map(|res| res.is_ok())
			.unwrap_or(false);

		if exited {
			debug!(target = "devmon.supervisor", pid = handle.pid, "server stopped");
		} else {
			warn!(
				target = "devmon.supervisor",
				pid = handle.pid,
				grace_ms = self.grace.as_millis() as u64,
				"server ignored interrupt, killing"
			);
			if let Some(kill_tx) = handle.kill_tx.take() {
				let _ = kill_tx.send(());
			}
			// The port stays taken until the killed child has been reaped.
			if tokio::time::timeout(KILL_WAIT, exit_rx.wait_for(Option::is_some)).await.is_err() {
				warn!(target = "devmon.supervisor", pid = handle.pid, "server still running after kill");
			}
		}
		Ok(())
	}
}

async fn watch_child(
	mut child: Child,
	pid: u32,
	exit_tx: watch::Sender<Option<ChildExit>>,
	mut kill_rx: oneshot::Receiver<()>,
	stop_requested: Arc<AtomicBool>,
	state: Arc<SupervisorState>,
	fatal_tx: FatalSender,
) {
	let status = tokio::select! {
		status = child.wait() => status,
		Ok(()) = &mut kill_rx => {
			#[cfg(unix)]
			if let Err(err) = signal_group(pid, libc::SIGKILL) {
				debug!(target = "devmon.supervisor", pid, error = %err, "failed to kill process group");
			}
			if let Err(err) = child.start_kill() {
				debug!(target = "devmon.supervisor", pid, error = %err, "failed to kill server");
			}
			child.wait().await
		}
	};

	let code = match status {
		Ok(status) => status.code(),
		Err(err) => {
			warn!(target = "devmon.supervisor", pid, error = %err, "failed waiting for server exit");
			None
		}
	};
	exit_tx.send_replace(Some(ChildExit { pid, code }));

	if stop_requested.load(Ordering::SeqCst) {
		debug!(target = "devmon.supervisor", pid, ?code, "server exited after stop request");
	} else if state.is_repairing() {
		info!(target = "devmon.supervisor", pid, ?code, "server exited during repair");
	} else {
		let code = code.unwrap_or(0);
		error!(target = "devmon.supervisor", pid, code, "server exited unexpectedly");
		let _ = fatal_tx.send(FatalEvent::ServerExited { code });
	}
}

fn interrupt(handle: &mut ServerHandle) {
	#[cfg(unix)]
	{
		if let Err(err) = signal_group(handle.pid, libc::SIGINT) {
			warn!(target = "devmon.supervisor", pid = handle.pid, error = %err, "failed to interrupt server");
		}
	}

	#[cfg(not(unix))]
	{
		if let Some(kill_tx) = handle.kill_tx.take() {
			let _ = kill_tx.send(());
		}
	}
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
	// SAFETY: kill(2) has no memory-safety preconditions; a negative pid
	// addresses the process group created with `process_group(0)`.
	let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
	if rc == 0 {
		Ok(())
	} else {
		Err(std::io::Error::last_os_error())
	}
}

fn shell_command(command: &str) -> Command {
	#[cfg(windows)]
	{
		let mut cmd = Command::new("cmd");
		cmd.arg("/C").arg(command);
		cmd
	}

	#[cfg(not(windows))]
	{
		let mut cmd = Command::new("sh");
		cmd.arg("-c").arg(command);
		cmd
	}
}
