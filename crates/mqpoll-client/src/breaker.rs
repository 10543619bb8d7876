//! Deferred cancellation of the dispatch loop.

use std::cell::Cell;
use std::rc::Rc;

/// Cancellation token for [`Session::run_loop`](crate::Session::run_loop).
///
/// Handlers cannot be preempted: a break requested while a handler runs takes
/// effect once that handler and the loop callback have returned. The flag is
/// cleared by the loop activation that observes it.
#[derive(Debug, Clone, Default)]
pub struct LoopBreaker {
    flag: Rc<Cell<bool>>,
}

impl LoopBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running loop stop after the current event.
    pub fn break_loop(&self) {
        self.flag.set(true);
    }

    pub fn is_set(&self) -> bool {
        self.flag.get()
    }

    /// Clear the flag, returning whether it was set.
    pub(crate) fn take(&self) -> bool {
        self.flag.replace(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let breaker = LoopBreaker::new();
        let handle = breaker.clone();
        handle.break_loop();
        assert!(breaker.is_set());
        assert!(breaker.take());
        assert!(!handle.is_set());
        assert!(!breaker.take());
    }
}
