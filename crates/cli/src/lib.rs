//! Command-line front end for the devmon dev-server monitor.

pub mod cli;
pub mod logging;
pub mod monitor;
pub mod styles;
