//! Shared shutdown flags.
//!
//! The accept loop stops admitting connections once shutdown is initiated;
//! the application waits for sessions to save their characters and then
//! marks shutdown complete before zones are stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ShutdownState {
    initiated: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        if !self.initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated, no new sessions will be admitted");
        }
    }

    pub fn complete_shutdown(&self) {
        if !self.complete.swap(true, Ordering::AcqRel) {
            info!("✅ Sessions drained, stopping zones");
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
