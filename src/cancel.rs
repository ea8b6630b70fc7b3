// src/cancel.rs - Session-wide stop flag shared by the scheduling and transport tasks
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag for a new session. Existing clones see the reset.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
