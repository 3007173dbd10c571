use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub key: String,
    pub file_index: u32,
    pub size: u64,
    pub sha256: String,
    pub attempts: u32,
}

/// Success marker for one task, handed upward for job-level merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_index: u32,
    pub container: String,
    pub files: Vec<UploadedFile>,
    pub committed_at: DateTime<Utc>,
}

impl TaskReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}
