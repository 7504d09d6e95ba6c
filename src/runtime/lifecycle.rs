//! One-directional server lifecycle: `NotStarted -> Running -> Stopped`.

use crate::error::ServerError;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::NotStarted,
            1 => ServerState::Running,
            _ => ServerState::Stopped,
        }
    }
}

/// Atomic holder for [`ServerState`]. This is the running flag polled by the
/// accept loop and every handler.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ServerState::NotStarted as u8),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Move from `NotStarted` to `Running`.
    pub fn begin(&self) -> Result<(), ServerError> {
        match self.state.compare_exchange(
            ServerState::NotStarted as u8,
            ServerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) => match ServerState::from_u8(current) {
                ServerState::Stopped => Err(ServerError::Stopped),
                _ => Err(ServerError::AlreadyStarted),
            },
        }
    }

    /// Move to `Stopped` from any state. Returns true only for the call that
    /// made the transition.
    pub fn halt(&self) -> bool {
        self.state.swap(ServerState::Stopped as u8, Ordering::AcqRel) != ServerState::Stopped as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ServerState::NotStarted);
        assert!(!lifecycle.is_running());

        lifecycle.begin().unwrap();
        assert!(lifecycle.is_running());
        assert!(matches!(lifecycle.begin(), Err(ServerError::AlreadyStarted)));

        assert!(lifecycle.halt());
        assert_eq!(lifecycle.state(), ServerState::Stopped);
        assert!(!lifecycle.halt());

        // No restart
        assert!(matches!(lifecycle.begin(), Err(ServerError::Stopped)));
        assert_eq!(lifecycle.state(), ServerState::Stopped);
    }

    #[test]
    fn test_halt_before_start() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.halt());
        assert!(matches!(lifecycle.begin(), Err(ServerError::Stopped)));
    }

    #[test]
    fn test_concurrent_halt_transitions_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.begin().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                std::thread::spawn(move || lifecycle.halt())
            })
            .collect();

        let transitions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&t| t)
            .count();
        assert_eq!(transitions, 1);
    }
}
