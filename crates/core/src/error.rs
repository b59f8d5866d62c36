//! Error types for the monitor.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising the dev server.
#[derive(Debug, Error)]
pub enum Error {
	/// The server command could not be spawned.
	#[error("Failed to spawn server command `{command}`: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	/// The headless browser could not be launched.
	#[error("Failed to launch browser: {0}")]
	BrowserLaunch(String),

	/// The browser session failed outside of launch (close, protocol errors).
	#[error("Browser error: {0}")]
	Browser(String),

	/// A page could not be opened or prepared inside the browser session.
	#[error("Failed to open page: {0}")]
	PageOpen(String),

	/// The trigger listener could not bind its address.
	#[error("Failed to bind trigger listener on {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	/// Invalid monitor configuration.
	#[error("Invalid configuration: {0}")]
	Config(String),

	/// A configuration file could not be read.
	#[error("Failed to read config file {path}: {source}")]
	ConfigFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true when this error must terminate the supervisor.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Error::Spawn { .. })
	}
}
