
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use devmon::MonitorConfig;

use crate::styles::cli_styles;

/// Root CLI for the dev-server monitor.
#[derive(Parser, Debug)]
#[command(name = "devmon")]
#[command(about = "Run a dev server, reload its page on demand and repair it when the page breaks")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
	pub verbose: u8,

	/// Only log warnings and errors
	#[arg(short, long)]
	pub quiet: bool,

	/// JSON config file (defaults to devmon.json in the project root)
	#[arg(short, long, value_name = "FILE", env = "DEVMON_CONFIG")]
	pub config: Option<PathBuf>,

	/// Project root the server runs in
	#[arg(long, value_name = "DIR", env = "DEVMON_ROOT")]
	pub root: Option<PathBuf>,

	/// Shell command that starts the dev server
	#[arg(long, value_name = "CMD", env = "DEVMON_SERVER_COMMAND")]
	pub server_command: Option<String>,

	#[arg(long, value_name = "HOST", env = "DEVMON_SERVER_HOST")]
	pub server_host: Option<String>,

	#[arg(long, value_name = "PORT", env = "DEVMON_SERVER_PORT")]
	pub server_port: Option<u16>,

	/// Interface the /notify listener binds
	#[arg(long, value_name = "HOST", env = "DEVMON_LISTENER_HOST")]
	pub listener_host: Option<String>,

	#[arg(long, value_name = "PORT", env = "DEVMON_LISTENER_PORT")]
	pub listener_port: Option<u16>,

	/// Build cache removed during repair, relative to the project root
	#[arg(long, value_name = "DIR", env = "DEVMON_CACHE_DIR")]
	pub cache_dir: Option<PathBuf>,

	/// Error text that marks a page load as broken (repeatable, replaces the defaults)
	#[arg(long = "marker", value_name = "TEXT")]
	pub markers: Vec<String>,

	/// User agent the probe browser identifies with
	#[arg(long, value_name = "UA")]
	pub user_agent: Option<String>,

	/// Show the probe browser window
	#[arg(long)]
	pub headed: bool,

	/// Chrome or Chromium executable to launch
	#[arg(long, value_name = "PATH", env = "DEVMON_CHROME")]
	pub chrome: Option<PathBuf>,

	#[arg(long, value_name = "MS")]
	pub navigation_timeout_ms: Option<u64>,

	#[arg(long, value_name = "MS")]
	pub startup_settle_ms: Option<u64>,

	#[arg(long, value_name = "MS")]
	pub stop_grace_ms: Option<u64>,

	#[arg(long, value_name = "MS")]
	pub notify_delay_ms: Option<u64>,
}

impl Cli {
	/// Builds the effective config: defaults, then the config file, then flags.
	pub fn resolve_config(&self) -> Result<MonitorConfig> {
		let mut config = match (&self.config, &self.root) {
			(Some(path), _) => MonitorConfig::load(path)
				.with_context(|| format!("Failed to load config {}", path.display()))?,
			(None, Some(root)) => MonitorConfig::discover(root)?,
			(None, None) => {
				let cwd = std::env::current_dir().context("Failed to read current directory")?;
				MonitorConfig::discover(&cwd)?
			}
		};
		self.apply(&mut config);
		config.validate()?;
		Ok(config)
	}

	/// Overrides every key that was given on the command line or through the
	/// environment.
	pub fn apply(&self, config: &mut MonitorConfig) {
		if let Some(root) = &self.root {
			config.project_root = Some(root.clone());
		}
		if let Some(command) = &self.server_command {
			config.server_command = command.clone();
		}
		if let Some(host) = &self.server_host {
			config.server_host = host.clone();
		}
		if let Some(port) = self.server_port {
			config.server_port = port;
		}
		if let Some(host) = &self.listener_host {
			config.listener_host = host.clone();
		}
		if let Some(port) = self.listener_port {
			config.listener_port = port;
		}
		if let Some(dir) = &self.cache_dir {
			config.cache_dir = dir.clone();
		}
		if !self.markers.is_empty() {
			config.error_markers = self.markers.clone();
		}
		if let Some(agent) = &self.user_agent {
			config.user_agent = agent.clone();
		}
		if self.headed {
			config.headless = false;
		}
		if let Some(chrome) = &self.chrome {
			config.chrome_executable = Some(chrome.clone());
		}
		if let Some(ms) = self.navigation_timeout_ms {
			config.navigation_timeout_ms = ms;
		}
		if let Some(ms) = self.startup_settle_ms {
			config.startup_settle_ms = ms;
		}
		if let Some(ms) = self.stop_grace_ms {
			config.stop_grace_ms = ms;
		}
		if let Some(ms) = self.notify_delay_ms {
			config.notify_delay_ms = ms;
		}
	}
}
