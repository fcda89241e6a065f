use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

/// A cancellation-bearing request scope (spec §5): every external entry
/// point is expected to construct one with the configured request deadline
/// (default 30s) and thread it through to the store. Long-running scans
/// check `ensure_alive` between iterations so a deadline expiry aborts
/// in-flight work with `Transient` rather than running unbounded.
#[derive(Debug, Clone, Copy)]
pub struct RequestScope {
    deadline: Instant,
}

impl RequestScope {
    pub fn with_deadline(timeout: Duration) -> Self {
        Self { deadline: Instant::now() + timeout }
    }

    /// A scope with no deadline, for internal background tasks (the
    /// liveness sweeper, the push dispatcher) that are not bound to a
    /// single external request.
    pub fn unbounded() -> Self {
        Self { deadline: Instant::now() + Duration::from_secs(60 * 60 * 24 * 365) }
    }

    pub fn ensure_alive(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(CoreError::Transient("request deadline exceeded".into()))
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
