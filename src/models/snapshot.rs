use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DesignId;

/// A timestamped plan copy. Snapshots are written once and never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version_id: String,
    pub design_id: DesignId,
    /// Revision of the plan that was copied.
    pub revision: u32,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
