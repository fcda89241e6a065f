use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transitions (spec §4.4).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// One cracking attempt (spec §3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub hash_type: i32,
    pub attack_mode: i32,
    pub hash_file_id: Uuid,
    pub wordlist_id: Uuid,
    pub rules: Option<String>,
    pub agent_id: Option<Uuid>,
    pub progress: i32,
    pub speed: i64,
    pub eta: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Invariant check from spec §3/§8: `running` jobs always have an agent
    /// and a start time.
    pub fn running_invariant_holds(&self) -> bool {
        if self.status != JobStatus::Running {
            return true;
        }
        self.agent_id.is_some() && self.started_at.is_some()
    }
}
