use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Default filter for a verbosity level. Browser protocol chatter stays off
/// unless asked for through `RUST_LOG`.
pub fn default_filter(verbosity: u8, quiet: bool) -> &'static str {
	if quiet {
		return "warn,chromiumoxide=off";
	}
	match verbosity {
		0 => "info,chromiumoxide=off",
		1 => "debug,chromiumoxide=warn",
		_ => "trace",
	}
}

pub fn init_logging(verbosity: u8, quiet: bool) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity, quiet)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_ansi(std::io::stderr().is_terminal())
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn quiet_wins_over_verbosity() {
		assert_eq!(default_filter(2, true), "warn,chromiumoxide=off");
	}

	#[test]
	fn filters_parse() {
		for level in 0..3 {
			assert!(EnvFilter::try_new(default_filter(level, false)).is_ok());
		}
	}
}
