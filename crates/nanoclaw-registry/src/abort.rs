use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// In-process abort handles for runs with work in flight. A cancel request
/// both flips the durable row and trips the token so the worker's upstream
/// call stops promptly.
#[derive(Clone, Default)]
pub struct AbortRegistry {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a starting worker. Replaces any stale token under the same
    /// run id.
    pub fn register(&self, run_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .insert(run_id.to_string(), token.clone());
        token
    }

    /// Trip the abort handle when one exists. Returns whether an in-flight
    /// worker was signalled.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.tokens.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the handle once the worker reached a terminal state.
    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_trips_registered_token() {
        let registry = AbortRegistry::new();
        let token = registry.register("run-1");
        assert!(!token.is_cancelled());
        assert!(registry.cancel("run-1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_run_is_noop() {
        let registry = AbortRegistry::new();
        assert!(!registry.cancel("run-ghost"));
    }

    #[test]
    fn remove_forgets_handle() {
        let registry = AbortRegistry::new();
        let _ = registry.register("run-1");
        registry.remove("run-1");
        assert!(!registry.cancel("run-1"));
    }
}
