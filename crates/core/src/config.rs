//! Monitor configuration.
//!
//! Every key is optional in the JSON file; missing keys fall back to the
//! defaults below. The CLI layers its flags over whatever was loaded here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name looked up in the project root when no explicit config is given.
pub const CONFIG_FILE_NAME: &str = "devmon.json";

/// User agent the probe identifies with. The served app skips its `/notify`
/// call for this agent so probe loads never re-trigger a check.
pub const DEFAULT_USER_AGENT: &str = "Portfolio-Monitor-Bot";

/// Console or page error fragments that mark a load as broken.
pub const DEFAULT_ERROR_MARKERS: &[&str] = &[
	"Internal Server Error",
	"negative time stamp",
	"Hydration failed",
	"Runtime TypeError",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
	/// Shell command that runs the dev server.
	pub server_command: String,
	pub server_host: String,
	pub server_port: u16,
	pub listener_host: String,
	pub listener_port: u16,
	/// Working directory of the server; `None` means the current directory.
	pub project_root: Option<PathBuf>,
	/// Build cache removed during repair, relative to the project root.
	pub cache_dir: PathBuf,
	pub error_markers: Vec<String>,
	pub user_agent: String,
	pub headless: bool,
	pub chrome_executable: Option<PathBuf>,
	pub navigation_timeout_ms: u64,
	pub startup_settle_ms: u64,
	pub stop_grace_ms: u64,
	pub notify_delay_ms: u64,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			server_command: "npm run dev".to_string(),
			server_host: "localhost".to_string(),
			server_port: 3000,
			listener_host: "127.0.0.1".to_string(),
			listener_port: 3001,
			project_root: None,
			cache_dir: PathBuf::from(".next"),
			error_markers: DEFAULT_ERROR_MARKERS.iter().map(|m| m.to_string()).collect(),
			user_agent: DEFAULT_USER_AGENT.to_string(),
			headless: true,
			chrome_executable: None,
			navigation_timeout_ms: 8_000,
			startup_settle_ms: 5_000,
			stop_grace_ms: 2_000,
			notify_delay_ms: 1_000,
		}
	}
}

impl MonitorConfig {
	/// Loads a config file. Missing keys keep their defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = fs::read_to_string(path).map_err(|source| Error::ConfigFile {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(serde_json::from_str(&raw)?)
	}

	/// Loads `devmon.json` from `root` when present, defaults otherwise.
	pub fn discover(root: &Path) -> Result<Self> {
		let candidate = root.join(CONFIG_FILE_NAME);
		if candidate.is_file() {
			let mut config = Self::load(&candidate)?;
			if config.project_root.is_none() {
				config.project_root = Some(root.to_path_buf());
			}
			Ok(config)
		} else {
			Ok(Self {
				project_root: Some(root.to_path_buf()),
				..Self::default()
			})
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.server_command.trim().is_empty() {
			return Err(Error::Config("serverCommand must not be empty".into()));
		}
		if self.server_port == self.listener_port {
			return Err(Error::Config(format!(
				"serverPort and listenerPort must differ (both are {})",
				self.server_port
			)));
		}
		if self.error_markers.iter().all(|m| m.is_empty()) {
			return Err(Error::Config("errorMarkers must contain at least one marker".into()));
		}
		Ok(())
	}

	/// URL the probe navigates to.
	pub fn server_url(&self) -> String {
		format!("http://{}:{}", self.server_host, self.server_port)
	}

	pub fn listener_addr(&self) -> String {
		format!("{}:{}", self.listener_host, self.listener_port)
	}

	pub fn root(&self) -> PathBuf {
		self.project_root.clone().unwrap_or_else(|| PathBuf::from("."))
	}

	/// Absolute (or root-relative) path of the build cache.
	pub fn cache_path(&self) -> PathBuf {
		if self.cache_dir.is_absolute() {
			self.cache_dir.clone()
		} else {
			self.root().join(&self.cache_dir)
		}
	}

	pub fn navigation_timeout(&self) -> Duration {
		Duration::from_millis(self.navigation_timeout_ms)
	}

	pub fn startup_settle(&self) -> Duration {
		Duration::from_millis(self.startup_settle_ms)
	}

	pub fn stop_grace(&self) -> Duration {
		Duration::from_millis(self.stop_grace_ms)
	}

	pub fn notify_delay(&self) -> Duration {
		Duration::from_millis(self.notify_delay_ms)
	}
}
