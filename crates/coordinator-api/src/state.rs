//! Shared state handed to every handler, mirroring the teacher's
//! `UiApiState` composition: one cheaply-`Clone`able struct wrapping the
//! coordinator plus the per-request deadline every entry point applies.

use std::sync::Arc;
use std::time::Duration;

use coordinator_core::{Coordinator, RequestScope};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    request_deadline: Duration,
}

impl ApiState {
    pub fn new(coordinator: Arc<Coordinator>, request_deadline: Duration) -> Self {
        Self { coordinator, request_deadline }
    }

    /// Fresh request-scoped deadline (spec §5: every external entry point
    /// gets one; none are shared across requests).
    pub fn scope(&self) -> RequestScope {
        RequestScope::with_deadline(self.request_deadline)
    }
}
