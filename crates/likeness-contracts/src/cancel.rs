use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-owned cancellation flag, shared between the caller and the router.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[test]
    fn clones_observe_cancellation() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!shared.is_cancelled());
        token.cancel();
        assert!(shared.is_cancelled());
    }
}
