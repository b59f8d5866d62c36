//! Process-wide check/repair guards.
//!
//! Two flags gate all work: `checking` is owned by the browser probe and
//! `repairing` by the repair coordinator. A guard is acquired with a
//! compare-and-swap and released when the returned guard value is dropped,
//! so an early return or a panic inside a phase can never leave a flag set.
//!
//! A third flag, `shutting_down`, is one-way. Once set no new check starts
//! and the supervisor refuses to spawn the server again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SupervisorState {
	repairing: AtomicBool,
	checking: AtomicBool,
	shutting_down: AtomicBool,
}

impl SupervisorState {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn is_repairing(&self) -> bool {
		self.repairing.load(Ordering::SeqCst)
	}

	pub fn is_checking(&self) -> bool {
		self.checking.load(Ordering::SeqCst)
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}

	/// Marks the monitor as shutting down. Cannot be undone.
	pub fn begin_shutdown(&self) {
		self.shutting_down.store(true, Ordering::SeqCst);
	}

	/// True while a check or a repair holds its guard.
	pub fn is_busy(&self) -> bool {
		self.is_checking() || self.is_repairing()
	}

	/// Acquires the check guard unless a check or a repair is already active,
	/// or the monitor is shutting down.
	pub fn try_begin_check(self: &Arc<Self>) -> Option<CheckGuard> {
		if self.is_repairing() || self.is_shutting_down() {
			return None;
		}
		self.checking
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|_| CheckGuard {
				state: Arc::clone(self),
			})
	}

	/// Acquires the repair guard unless a repair is already active.
	pub fn try_begin_repair(self: &Arc<Self>) -> Option<RepairGuard> {
		self.repairing
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|_| RepairGuard {
				state: Arc::clone(self),
			})
	}
}

/// Held for the duration of one health check.
#[derive(Debug)]
#[must_use = "the check guard is released as soon as it is dropped"]
pub struct CheckGuard {
	state: Arc<SupervisorState>,
}

impl Drop for CheckGuard {
	fn drop(&mut self) {
		self.state.checking.store(false, Ordering::SeqCst);
	}
}

/// Held for the duration of one repair sequence.
#[derive(Debug)]
#[must_use = "the repair guard is released as soon as it is dropped"]
pub struct RepairGuard {
	state: Arc<SupervisorState>,
}

impl Drop for RepairGuard {
	fn drop(&mut self) {
		self.state.repairing.store(false, Ordering::SeqCst);
	}
}
