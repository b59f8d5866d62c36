//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::probe::{BrowserBackend, BrowserProbe, PageSession};
use crate::repair::RepairCoordinator;
use crate::state::SupervisorState;
use crate::supervisor::{FatalReceiver, ServerControl, fatal_channel};
use crate::verdict::{PageEvent, PageLoad};

/// Records start/stop calls, optionally noting whether a cache dir exists.
#[derive(Default)]
pub(crate) struct RecordingServer {
	calls: Mutex<Vec<String>>,
	watch: Option<PathBuf>,
	fail_stop: bool,
	fail_start: bool,
}

impl RecordingServer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn watching(cache: &Path) -> Arc<Self> {
		Arc::new(Self {
			watch: Some(cache.to_path_buf()),
			..Self::default()
		})
	}

	pub fn failing_stop() -> Arc<Self> {
		Arc::new(Self {
			fail_stop: true,
			..Self::default()
		})
	}

	pub fn failing_start() -> Arc<Self> {
		Arc::new(Self {
			fail_start: true,
			..Self::default()
		})
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().unwrap().clone()
	}

	fn record(&self, op: &str) {
		let entry = match &self.watch {
			Some(cache) if cache.exists() => format!("{op} (cache present)"),
			Some(_) => format!("{op} (cache absent)"),
			None => op.to_string(),
		};
		self.calls.lock().unwrap().push(entry);
	}
}

#[async_trait]
impl ServerControl for RecordingServer {
	async fn start(&self) -> Result<()> {
		self.record("start");
		if self.fail_start {
			return Err(Error::Spawn {
				command: "npm run dev".into(),
				source: std::io::Error::new(std::io::ErrorKind::NotFound, "sh not found"),
			});
		}
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.record("stop");
		if self.fail_stop {
			return Err(Error::Io(std::io::Error::other("interrupt failed")));
		}
		Ok(())
	}
}

pub(crate) fn healthy() -> PageLoad {
	PageLoad {
		status: Some(200),
		..PageLoad::default()
	}
}

pub(crate) fn with_events(events: Vec<PageEvent>) -> PageLoad {
	PageLoad {
		events,
		status: Some(200),
		navigation_error: None,
	}
}

#[derive(Default)]
struct ScriptInner {
	script: Mutex<VecDeque<Result<PageLoad>>>,
	load_delay: Mutex<Duration>,
	fail_launch: AtomicBool,
	launches: AtomicUsize,
	loads: AtomicUsize,
	open_pages: AtomicUsize,
	max_open_pages: AtomicUsize,
	closed: AtomicBool,
}

/// Browser backend that replays queued page loads; healthy once the queue is empty.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
	inner: Arc<ScriptInner>,
}

impl ScriptedBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, load: PageLoad) {
		self.inner.script.lock().unwrap().push_back(Ok(load));
	}

	pub fn push_err(&self, err: Error) {
		self.inner.script.lock().unwrap().push_back(Err(err));
	}

	pub fn set_load_delay(&self, delay: Duration) {
		*self.inner.load_delay.lock().unwrap() = delay;
	}

	pub fn fail_launch(&self, fail: bool) {
		self.inner.fail_launch.store(fail, Ordering::SeqCst);
	}

	pub fn launches(&self) -> usize {
		self.inner.launches.load(Ordering::SeqCst)
	}

	pub fn loads(&self) -> usize {
		self.inner.loads.load(Ordering::SeqCst)
	}

	pub fn max_open_pages(&self) -> usize {
		self.inner.max_open_pages.load(Ordering::SeqCst)
	}

	pub fn closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl BrowserBackend for ScriptedBackend {
	type Session = ScriptedSession;

	async fn launch(&self) -> Result<ScriptedSession> {
		if self.inner.fail_launch.load(Ordering::SeqCst) {
			return Err(Error::BrowserLaunch("chrome not found".into()));
		}
		self.inner.launches.fetch_add(1, Ordering::SeqCst);
		Ok(ScriptedSession {
			inner: Arc::clone(&self.inner),
		})
	}
}

pub(crate) struct ScriptedSession {
	inner: Arc<ScriptInner>,
}

#[async_trait]
impl PageSession for ScriptedSession {
	async fn load(&mut self, _url: &str, _timeout: Duration) -> Result<PageLoad> {
		self.inner.loads.fetch_add(1, Ordering::SeqCst);
		let open = self.inner.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
		self.inner.max_open_pages.fetch_max(open, Ordering::SeqCst);

		let delay = *self.inner.load_delay.lock().unwrap();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		self.inner.open_pages.fetch_sub(1, Ordering::SeqCst);
		self.inner
			.script
			.lock()
			.unwrap()
			.pop_front()
			.unwrap_or_else(|| Ok(healthy()))
	}

	async fn close(&mut self) -> Result<()> {
		self.inner.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

/// A probe wired to scripted collaborators.
pub(crate) struct Harness {
	pub state: Arc<SupervisorState>,
	pub server: Arc<RecordingServer>,
	pub backend: ScriptedBackend,
	pub probe: Arc<BrowserProbe<ScriptedBackend>>,
	pub fatal_rx: FatalReceiver,
	_cache: tempfile::TempDir,
}

impl Harness {
	pub fn new() -> Self {
		let cache = tempfile::tempdir().unwrap();
		let state = SupervisorState::new();
		let server = RecordingServer::new();
		let backend = ScriptedBackend::new();
		let (fatal_tx, fatal_rx) = fatal_channel();

		let repair = Arc::new(RepairCoordinator::new(
			Arc::clone(&server) as Arc<dyn ServerControl>,
			cache.path().join(".next"),
			Arc::clone(&state),
			fatal_tx,
		));
		let probe = Arc::new(BrowserProbe::new(
			backend.clone(),
			&MonitorConfig::default(),
			Arc::clone(&state),
			repair,
		));

		Self {
			state,
			server,
			backend,
			probe,
			fatal_rx,
			_cache: cache,
		}
	}

	/// Number of completed stop/start repair cycles.
	pub fn repairs(&self) -> usize {
		self.server.calls().iter().filter(|c| c.starts_with("start")).count()
	}
}
