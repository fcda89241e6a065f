//! Progress ingestor (spec §4.6, component C6): validates and applies
//! streaming progress/speed/ETA updates, and the two terminal writes
//! (`CompleteJob`, `FailJob`) that ride the same per-job lock as the state
//! machine in [`crate::jobs`].

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::entities::{Job, JobStatus};
use crate::error::{CoreError, Result};
use crate::events::Topic;
use crate::jobs::JobMachine;
use crate::scope::RequestScope;

pub struct ProgressIngestor {
    machine: Arc<JobMachine>,
}

impl ProgressIngestor {
    pub fn new(machine: Arc<JobMachine>) -> Self {
        Self { machine }
    }

    /// `UpdateProgress(job_id, progress, speed, eta?)` (spec §4.6): rejected
    /// unless the job is `running`, rejected on out-of-range `progress`,
    /// negative `speed`, or a `progress` below the job's current value
    /// (strict monotonicity). ETAs are stored as-given and never
    /// interpreted by the core.
    pub async fn update_progress(
        &self,
        scope: &RequestScope,
        job_id: Uuid,
        progress: i32,
        speed: i64,
        eta: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Job> {
        if !(0..=100).contains(&progress) {
            return Err(CoreError::invalid("invalid_progress_range", "progress must be in [0, 100]"));
        }
        if speed < 0 {
            return Err(CoreError::invalid("invalid_speed", "speed must be >= 0"));
        }

        let _guard = self.machine.lock(job_id).await;
        let job = self.machine.store().get_job_by_id(scope, job_id).await?;
        if job.status != JobStatus::Running {
            return Err(CoreError::conflict("invalid_transition", format!("job is not running (status={:?})", job.status)));
        }
        if progress < job.progress {
            return Err(CoreError::invalid("non_monotone_progress", format!("progress {progress} is below current value {}", job.progress)));
        }

        let updated = self.machine.store().update_job_progress(scope, job_id, progress, speed, eta).await?;
        self.machine.invalidate_pub(&updated);
        self.machine.events().publish(
            Topic::JobProgress,
            json!({ "job_id": updated.id, "progress": updated.progress, "speed": updated.speed, "eta": updated.eta }),
        );
        Ok(updated)
    }

    /// `CompleteJob(job_id, result, final_speed)`: terminal transition from
    /// `running`; `result` is stored verbatim and never interpreted by the
    /// core (it may be a recovered plaintext or an opaque "exhausted"
    /// marker).
    pub async fn complete_job(&self, scope: &RequestScope, job_id: Uuid, result: String, final_speed: i64) -> Result<Job> {
        self.machine
            .finish(scope, job_id, JobStatus::Completed, Some(result), Some(final_speed), &[JobStatus::Running])
            .await
    }

    /// `FailJob(job_id, reason)`: terminal transition from any non-terminal
    /// status; `reason` is stored in the `result` field.
    pub async fn fail_job(&self, scope: &RequestScope, job_id: Uuid, reason: String) -> Result<Job> {
        self.machine
            .finish(
                scope,
                job_id,
                JobStatus::Failed,
                Some(reason),
                None,
                &[JobStatus::Pending, JobStatus::Assigned, JobStatus::Running, JobStatus::Paused],
            )
            .await
    }
}
