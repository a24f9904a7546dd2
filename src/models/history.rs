use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DesignId;

/// Pipeline stage a flow was in when something happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Translate,
    Edit,
    Compile,
    Execute,
    Export,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Edit => "edit",
            Self::Compile => "compile",
            Self::Execute => "execute",
            Self::Export => "export",
            Self::Store => "store",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "translate" => Some(Self::Translate),
            "edit" => Some(Self::Edit),
            "compile" => Some(Self::Compile),
            "execute" => Some(Self::Execute),
            "export" => Some(Self::Export),
            "store" => Some(Self::Store),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Succeeded,
    Failed,
    /// The editor changed a value to satisfy the feature grammar.
    Adjusted,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Adjusted => "adjusted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "adjusted" => Some(Self::Adjusted),
            _ => None,
        }
    }
}

/// An append-only log entry recording one stage outcome for a design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignEvent {
    pub id: Uuid,
    pub design_id: DesignId,
    pub stage: Stage,
    pub outcome: EventOutcome,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventInput {
    pub design_id: DesignId,
    pub stage: Stage,
    pub outcome: EventOutcome,
    pub detail: String,
}
