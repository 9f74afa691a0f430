//! Per-session cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fire-once interruption flag shared between the orchestrator and one
/// processing session.
///
/// Firing is monotonic: once fired the token never resets. Firing does not
/// stop in-flight work; it only tells every stage to stop producing effects.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// True if both handles belong to the same session.
    pub fn same_session(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.fired, &other.fired)
    }
}
