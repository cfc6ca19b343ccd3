//! Console rendering of update progress

use std::sync::atomic::{AtomicU64, Ordering};

use dm_update::UpdateObserver;

use super::{print_error, print_info, print_success};

/// Prints update notifications to the terminal
///
/// Progress is reported in 10% steps to keep the output readable.
#[derive(Debug)]
pub struct ConsoleObserver {
    last_step: AtomicU64,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            last_step: AtomicU64::new(u64::MAX),
        }
    }

    /// The step to print for `current/total`, if it differs from the last
    fn next_step(&self, current: u64, total: u64) -> Option<u64> {
        if total == 0 {
            return None;
        }
        let step = (current.min(total) * 10 / total) * 10;
        let previous = self.last_step.swap(step, Ordering::Relaxed);
        (previous != step).then_some(step)
    }
}

impl UpdateObserver for ConsoleObserver {
    fn on_status(&self, message: &str) {
        self.last_step.store(u64::MAX, Ordering::Relaxed);
        print_info(message);
    }

    fn on_progress(&self, current: u64, total: u64) {
        if let Some(percent) = self.next_step(current, total) {
            println!("  {}%", percent);
        }
    }

    fn on_finished(&self, success: bool, message: &str) {
        if success {
            print_success(message);
        } else {
            print_error(message);
        }
    }
}
