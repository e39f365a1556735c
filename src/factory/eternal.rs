use std::sync::{Mutex, PoisonError};

use tracing::info;

use super::models::LoopState;

/// Answer of [`EternalLoopController::try_begin_fix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixGate {
    /// Go ahead; this is fix attempt number `attempt`.
    Proceed { attempt: u32 },
    /// The loop is off. Do not fix.
    Inactive,
    /// The configured cap is spent; the loop has been switched off.
    CapReached { attempts: u32 },
}

/// Owner of [`LoopState`]: the on/off switch of fix-publish-poll cycling.
///
/// `Stopped -> Running -> Stopped`. Every decision reads the live state, so
/// a `stop()` issued while a poll is in flight is seen by that poll's
/// terminal handling.
pub struct EternalLoopController {
    state: Mutex<LoopState>,
    max_attempts: Option<u32>,
}

impl EternalLoopController {
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            state: Mutex::new(LoopState::default()),
            max_attempts,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoopState {
        *self.lock()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Switch the loop on with a fresh attempt count.
    /// Returns `false` (and changes nothing) if it was already on.
    pub fn start(&self) -> bool {
        let mut state = self.lock();
        if state.active {
            return false;
        }
        *state = LoopState {
            active: true,
            attempt_count: 0,
        };
        info!("eternal loop started");
        true
    }

    /// Switch the loop off. Returns the final state if it was on.
    pub fn stop(&self) -> Option<LoopState> {
        let mut state = self.lock();
        if !state.active {
            return None;
        }
        let last = *state;
        *state = LoopState::default();
        info!(attempts = last.attempt_count, "eternal loop stopped");
        Some(last)
    }

    /// The only way a fix attempt begins: checks the live state and counts
    /// the attempt under the same lock.
    pub fn try_begin_fix(&self) -> FixGate {
        let mut state = self.lock();
        if !state.active {
            return FixGate::Inactive;
        }
        if let Some(cap) = self.max_attempts
            && state.attempt_count >= cap
        {
            *state = LoopState::default();
            return FixGate::CapReached { attempts: cap };
        }
        state.attempt_count += 1;
        FixGate::Proceed {
            attempt: state.attempt_count,
        }
    }
}
