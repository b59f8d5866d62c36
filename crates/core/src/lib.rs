//! devmon: keeps a dev server healthy.
//!
//! The monitor runs the application's dev server as a child process, reloads
//! its home page in a headless browser whenever the served app reports a page
//! load, and repairs the server (stop, clear build cache, start) when the page
//! shows one of a known set of runtime failures.
//!
//! # Components
//!
//! - [`ProcessSupervisor`]: child-process lifecycle and the fatal-exit policy
//! - [`BrowserProbe`]: one browser session, one page per health check
//! - [`RepairCoordinator`]: the stop/clear/start sequence, never concurrent with itself
//! - [`TriggerListener`]: the `/notify` endpoint that schedules deferred checks
//!
//! All of them share one [`SupervisorState`], whose two guards make sure at
//! most one check, and within it at most one repair, is active at a time.

pub mod config;
pub mod error;
pub mod probe;
pub mod repair;
pub mod state;
pub mod supervisor;
#[cfg(test)]
mod testing;
pub mod trigger;
pub mod verdict;

pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use probe::{BrowserBackend, BrowserProbe, CheckOutcome, ChromiumBackend, HealthCheck, PageSession};
pub use repair::{RepairCoordinator, RepairOutcome};
pub use state::SupervisorState;
pub use supervisor::{
	ChildExit, FatalEvent, FatalReceiver, FatalSender, ProcessSupervisor, ServerControl, fatal_channel,
};
pub use trigger::TriggerListener;
pub use verdict::{ErrorMarkers, HealthVerdict, PageEvent, PageLoad};
