//! Process-wide exclusive device session lease
//!
//! A device session is a scarce resource, so at most one stream may exist at
//! a time. The lease is owned by the stream and released when it is dropped.

use crate::error::{Result, StreamError};
use std::sync::atomic::{AtomicBool, Ordering};

static LEASE_HELD: AtomicBool = AtomicBool::new(false);

/// Proof of exclusive ownership of the device session
#[derive(Debug)]
pub struct SessionLease {
    _private: (),
}

impl SessionLease {
    /// Acquire the lease, failing fast if another holder exists
    pub fn acquire() -> Result<Self> {
        LEASE_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self { _private: () })
            .map_err(|_| StreamError::AlreadyActive)
    }

    /// Whether a lease could be acquired right now
    pub fn is_available() -> bool {
        !LEASE_HELD.load(Ordering::Acquire)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        LEASE_HELD.store(false, Ordering::Release);
    }
}
