// ── Single-flight gate ──
//
// Admits one pass runner at a time. A request that arrives while a pass
// runs only sets `rerun`; the runner checks it under the same lock right
// before going idle, so any number of requests during a pass collapse into
// exactly one trailing pass.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    rerun: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    /// Try to become the runner. Returns `false` (and records a rerun) if a
    /// pass is already running.
    pub(crate) fn try_enter(&self) -> bool {
        let mut state = self.lock();
        if state.running {
            state.rerun = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// Called by the runner after each pass. Returns `true` if another pass
    /// must run; otherwise the gate goes idle.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.lock();
        if state.rerun {
            state.rerun = false;
            true
        } else {
            state.running = false;
            false
        }
    }

    /// Go idle unconditionally, dropping any pending rerun.
    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        state.rerun = false;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_gate_admits_runner() {
        let gate = Gate::default();
        assert!(gate.try_enter());
        assert!(gate.is_running());
        assert!(!gate.finish());
        assert!(!gate.is_running());
    }

    #[test]
    fn requests_during_a_pass_coalesce_into_one_rerun() {
        let gate = Gate::default();
        assert!(gate.try_enter());

        for _ in 0..5 {
            assert!(!gate.try_enter());
        }

        assert!(gate.finish(), "one trailing pass");
        assert!(!gate.finish(), "and only one");
        assert!(!gate.is_running());
    }

    #[test]
    fn stop_discards_pending_rerun() {
        let gate = Gate::default();
        assert!(gate.try_enter());
        assert!(!gate.try_enter());
        gate.stop();
        assert!(!gate.is_running());
        assert!(gate.try_enter());
    }
}
