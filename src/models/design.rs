use std::fmt;
use std::str::FromStr;

use cadplan_core::ExportFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short opaque identifier threading a design's plan, program and mesh together.
///
/// Minted once per create as 8 hex characters; reused by every refine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DesignId(String);

impl DesignId {
    pub fn mint() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(hex[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an id read back from the registry, which only ever stores validated ids.
    pub(crate) fn from_stored(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DesignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DesignId {
    type Err = String;

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("Invalid design id: {:?}", s))
        }
    }
}

impl TryFrom<String> for DesignId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DesignId> for String {
    fn from(id: DesignId) -> Self {
        id.0
    }
}

/// Lifecycle state of a design.
///
/// - `Initial`: identity minted, nothing persisted yet
/// - `Planned`: plan persisted, program missing or stale
/// - `Compiled`: program persisted for the current plan
/// - `Exported`: mesh written from the current program
///
/// Refine moves a built design back to `Planned` and drives it forward again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DesignState {
    Initial,
    Planned,
    Compiled,
    Exported,
}

impl DesignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Planned => "planned",
            Self::Compiled => "compiled",
            Self::Exported => "exported",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(Self::Initial),
            "planned" => Some(Self::Planned),
            "compiled" => Some(Self::Compiled),
            "exported" => Some(Self::Exported),
            _ => None,
        }
    }

    /// Whether a program exists for the current plan.
    pub fn has_program(&self) -> bool {
        matches!(self, Self::Compiled | Self::Exported)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    pub id: DesignId,
    /// The natural-language request the design was created from.
    pub request: Option<String>,
    pub state: DesignState,
    /// Incremented on every plan overwrite; the first plan is revision 1.
    pub revision: u32,
    pub export_format: ExportFormat,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a new design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDesignInput {
    pub id: DesignId,
    pub request: Option<String>,
    pub export_format: ExportFormat,
}
