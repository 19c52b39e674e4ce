//! Stream lifecycle state machine
//!
//! ```text
//! Idle --open--> Initialized --start--> Running <--pause/resume--> Paused
//!                     ^                    |                          |
//!                     +-------stop---------+--------------------------+
//! any state --close--> Closed (terminal)
//! ```
//!
//! The state lives in a single atomic so the arrival path can read it from
//! the device thread without locking. Transitions are compare-and-swap, which
//! lets the device's freeze notification race a local call safely.

use crate::error::{Result, StreamError};
use crate::types::{StateChange, StreamState};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Default)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether arriving frames should be enqueued
    pub fn is_running(&self) -> bool {
        self.current() == StreamState::Running
    }

    /// Move to `to` if the current state is one of `allowed`.
    ///
    /// On rejection the state is unchanged; a closed stream always reports
    /// [`StreamError::Closed`].
    pub fn transition(
        &self,
        allowed: &[StreamState],
        to: StreamState,
        operation: &'static str,
    ) -> Result<StateChange> {
        let mut current = self.current();
        loop {
            if !allowed.contains(&current) {
                return Err(match current {
                    StreamState::Closed => StreamError::Closed,
                    from => StreamError::InvalidTransition { from, operation },
                });
            }
            match self.state.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(StateChange { from: current, to }),
                Err(actual) => current = StreamState::from_u8(actual),
            }
        }
    }

    /// Running -> Paused. Pausing a paused stream is a no-op (`Ok(None)`).
    pub fn pause(&self) -> Result<Option<StateChange>> {
        self.toggle(StreamState::Running, StreamState::Paused, "pause")
    }

    /// Paused -> Running. Resuming a running stream is a no-op (`Ok(None)`).
    pub fn resume(&self) -> Result<Option<StateChange>> {
        self.toggle(StreamState::Paused, StreamState::Running, "resume")
    }

    fn toggle(
        &self,
        from: StreamState,
        to: StreamState,
        operation: &'static str,
    ) -> Result<Option<StateChange>> {
        let mut current = self.current();
        loop {
            if current == to {
                return Ok(None);
            }
            if current != from {
                return Err(match current {
                    StreamState::Closed => StreamError::Closed,
                    state => StreamError::InvalidTransition {
                        from: state,
                        operation,
                    },
                });
            }
            match self.state.compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Some(StateChange { from, to })),
                Err(actual) => current = StreamState::from_u8(actual),
            }
        }
    }

    /// Enter the terminal state. Returns `None` if already closed.
    pub fn close(&self) -> Option<StateChange> {
        let previous = StreamState::from_u8(
            self.state
                .swap(StreamState::Closed as u8, Ordering::AcqRel),
        );
        (previous != StreamState::Closed).then_some(StateChange {
            from: previous,
            to: StreamState::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn opened() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle
            .transition(&[StreamState::Idle], StreamState::Initialized, "open")
            .unwrap();
        lifecycle
    }

    #[test]
    fn test_starts_idle() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.current(), StreamState::Idle);
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle
            .transition(
                &[StreamState::Initialized, StreamState::Paused],
                StreamState::Running,
                "start",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::InvalidTransition {
                from: StreamState::Idle,
                operation: "start"
            }
        ));
        assert_eq!(lifecycle.current(), StreamState::Idle);
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let lifecycle = opened();
        lifecycle
            .transition(&[StreamState::Initialized], StreamState::Running, "start")
            .unwrap();

        let first = lifecycle.pause().unwrap();
        assert_eq!(
            first,
            Some(StateChange {
                from: StreamState::Running,
                to: StreamState::Paused
            })
        );
        assert_eq!(lifecycle.pause().unwrap(), None);
        assert_eq!(lifecycle.current(), StreamState::Paused);

        assert!(lifecycle.resume().unwrap().is_some());
        assert_eq!(lifecycle.resume().unwrap(), None);
        assert_eq!(lifecycle.current(), StreamState::Running);
    }

    #[test]
    fn test_pause_requires_running() {
        let lifecycle = opened();
        assert!(matches!(
            lifecycle.pause(),
            Err(StreamError::InvalidTransition { .. })
        ));
        assert_eq!(lifecycle.current(), StreamState::Initialized);
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let lifecycle = opened();
        let change = lifecycle.close().unwrap();
        assert_eq!(change.from, StreamState::Initialized);
        assert!(lifecycle.close().is_none());

        assert!(matches!(lifecycle.resume(), Err(StreamError::Closed)));
        assert!(matches!(
            lifecycle.transition(&[StreamState::Idle], StreamState::Initialized, "open"),
            Err(StreamError::Closed)
        ));
    }

    #[test]
    fn test_concurrent_toggles_end_consistent() {
        let lifecycle = Arc::new(opened());
        lifecycle
            .transition(&[StreamState::Initialized], StreamState::Running, "start")
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let lifecycle = lifecycle.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            lifecycle.pause().unwrap();
                        } else {
                            lifecycle.resume().unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = lifecycle.current();
        assert!(state == StreamState::Running || state == StreamState::Paused);
    }
}
