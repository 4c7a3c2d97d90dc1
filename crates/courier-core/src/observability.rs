use serde::{Deserialize, Serialize};

/// Snapshot of request counts by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}
