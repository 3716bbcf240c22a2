use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline-wide, one-way stop flag.
///
/// Clones share the same flag. Once set it stays set for the rest of the
/// run; every stage polls it between bounded channel waits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that actually
    /// raised it; later calls are no-ops.
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
