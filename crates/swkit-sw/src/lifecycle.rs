//! Coordinator lifecycle state machine.
//!
//! ```text
//! Installing ──ok──▶ Waiting ──release / skip-waiting──▶ Activating ──▶ Active
//!     │                                                                 │
//!     └──fail──▶ Redundant ◀──────────────── replaced ──────────────────┘
//! ```
//!
//! A skip-waiting request that arrives while still installing is remembered
//! and applied as soon as the install succeeds.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ServiceWorkerError;

/// Lifecycle state of one coordinator version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Precaching the manifest.
    Installing,
    /// Installed, waiting for the previous version to be released.
    Waiting,
    /// Cleaning up old caches and claiming clients.
    Activating,
    /// Controlling pages.
    Active,
    /// Install failed or replaced by a newer version.
    Redundant,
}

/// Sole owner of lifecycle transition rules.
#[derive(Debug)]
pub struct LifecycleController {
    state: LifecycleState,
    skip_waiting: bool,
    state_changed_at: Instant,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Installing,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Precache finished. Moves to `Waiting`, or straight to `Activating`
    /// if skip-waiting was requested during install.
    pub fn install_succeeded(&mut self) -> Result<LifecycleState, ServiceWorkerError> {
        self.require(LifecycleState::Installing, "install_succeeded")?;
        let next = if self.skip_waiting {
            LifecycleState::Activating
        } else {
            LifecycleState::Waiting
        };
        self.set_state(next);
        Ok(next)
    }

    /// Precache failed; this version will never activate.
    pub fn install_failed(&mut self) -> Result<(), ServiceWorkerError> {
        self.require(LifecycleState::Installing, "install_failed")?;
        self.set_state(LifecycleState::Redundant);
        Ok(())
    }

    /// Handle a skip-waiting request. Returns `true` if this moved the
    /// version from `Waiting` to `Activating`.
    pub fn skip_waiting(&mut self) -> bool {
        self.skip_waiting = true;
        if self.state == LifecycleState::Waiting {
            self.set_state(LifecycleState::Activating);
            return true;
        }
        false
    }

    /// Normal replacement: the previous version no longer controls any page.
    ///
    /// A version already moved to `Activating` by skip-waiting is left as is.
    pub fn release(&mut self) -> Result<(), ServiceWorkerError> {
        match self.state {
            LifecycleState::Waiting => {
                self.set_state(LifecycleState::Activating);
                Ok(())
            }
            LifecycleState::Activating => Ok(()),
            other => Err(ServiceWorkerError::InvalidState(format!(
                "cannot release from {other:?}"
            ))),
        }
    }

    /// Cleanup and claim finished.
    pub fn activation_complete(&mut self) -> Result<(), ServiceWorkerError> {
        self.require(LifecycleState::Activating, "activation_complete")?;
        self.set_state(LifecycleState::Active);
        Ok(())
    }

    /// Replaced by a newer version.
    pub fn retire(&mut self) {
        self.set_state(LifecycleState::Redundant);
    }

    fn require(&self, state: LifecycleState, op: &str) -> Result<(), ServiceWorkerError> {
        if self.state != state {
            return Err(ServiceWorkerError::InvalidState(format!(
                "{op} requires {state:?}, current state is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn set_state(&mut self, state: LifecycleState) {
        info!(
            from = ?self.state,
            to = ?state,
            held_ms = self.state_changed_at.elapsed().as_millis() as u64,
            "Lifecycle transition"
        );
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut lc = LifecycleController::new();
        assert_eq!(lc.state(), LifecycleState::Installing);

        assert_eq!(lc.install_succeeded().unwrap(), LifecycleState::Waiting);
        lc.release().unwrap();
        assert_eq!(lc.state(), LifecycleState::Activating);
        lc.activation_complete().unwrap();
        assert_eq!(lc.state(), LifecycleState::Active);
    }

    #[test]
    fn test_skip_waiting_from_waiting() {
        let mut lc = LifecycleController::new();
        lc.install_succeeded().unwrap();

        assert!(lc.skip_waiting());
        assert_eq!(lc.state(), LifecycleState::Activating);
    }

    #[test]
    fn test_skip_waiting_during_install_is_remembered() {
        let mut lc = LifecycleController::new();
        assert!(!lc.skip_waiting());
        assert_eq!(lc.state(), LifecycleState::Installing);

        assert_eq!(lc.install_succeeded().unwrap(), LifecycleState::Activating);
    }

    #[test]
    fn test_skip_waiting_when_active_is_noop() {
        let mut lc = LifecycleController::new();
        lc.install_succeeded().unwrap();
        lc.release().unwrap();
        lc.activation_complete().unwrap();

        assert!(!lc.skip_waiting());
        assert_eq!(lc.state(), LifecycleState::Active);
    }

    #[test]
    fn test_install_failure_is_terminal() {
        let mut lc = LifecycleController::new();
        lc.install_failed().unwrap();
        assert_eq!(lc.state(), LifecycleState::Redundant);

        assert!(lc.release().is_err());
        assert!(lc.activation_complete().is_err());
    }

    #[test]
    fn test_cannot_activate_before_install() {
        let mut lc = LifecycleController::new();
        assert!(matches!(
            lc.activation_complete(),
            Err(ServiceWorkerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_release_after_skip_waiting_is_idempotent() {
        let mut lc = LifecycleController::new();
        lc.install_succeeded().unwrap();
        lc.skip_waiting();
        lc.release().unwrap();
        assert_eq!(lc.state(), LifecycleState::Activating);
    }
}
