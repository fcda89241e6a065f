use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata pointer for an uploaded hash file or wordlist (spec §3
/// "HashFile / Wordlist"). Body I/O lives outside the dispatch core; these
/// are immutable references once created.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HashFile {
    pub id: Uuid,
    pub name: String,
    pub orig_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wordlist {
    pub id: Uuid,
    pub name: String,
    pub orig_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub word_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}
