//! Error taxonomy shared by every pipeline component.

use std::fmt;

use cadplan_core::program::ProgramError;
use cadplan_core::{Rule, Violation};
use serde::Serialize;
use thiserror::Error;

use crate::models::{DesignId, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamUnavailable,
    SchemaViolation,
    ProgramInvalid,
    GrammarViolation,
    ValidationFailed,
    NotFound,
    CorruptPlan,
    UnresolvedTarget,
    DesignBusy,
    Storage,
}

#[derive(Debug, Error)]
pub enum CadError {
    #[error("language model unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("response does not match the plan schema: {0}")]
    SchemaViolation(String),

    #[error("program is invalid: {message}")]
    ProgramInvalid { message: String, rule: Option<Rule> },

    #[error("feature grammar violation: {0}")]
    GrammarViolation(Violation),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("design {0} not found")]
    NotFound(DesignId),

    #[error("stored plan for design {id} is corrupt: {reason}")]
    CorruptPlan { id: DesignId, reason: String },

    #[error("cannot resolve edit target: {0}")]
    UnresolvedTarget(String),

    #[error("design {0} is being modified by another request")]
    DesignBusy(DesignId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::SchemaViolation(_) => ErrorKind::SchemaViolation,
            Self::ProgramInvalid { .. } => ErrorKind::ProgramInvalid,
            Self::GrammarViolation(_) => ErrorKind::GrammarViolation,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CorruptPlan { .. } => ErrorKind::CorruptPlan,
            Self::UnresolvedTarget(_) => ErrorKind::UnresolvedTarget,
            Self::DesignBusy(_) => ErrorKind::DesignBusy,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The grammar rule behind this error, if any.
    pub fn rule(&self) -> Option<Rule> {
        match self {
            Self::GrammarViolation(violation) => Some(violation.rule),
            Self::ProgramInvalid { rule, .. } => *rule,
            _ => None,
        }
    }

    /// Whether the model can be re-prompted with this error as feedback.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Self::SchemaViolation(_) | Self::ProgramInvalid { .. } | Self::GrammarViolation(_)
        )
    }

    /// Maps a program failure from static checking or compilation.
    pub fn invalid_program(err: ProgramError) -> Self {
        Self::ProgramInvalid {
            rule: err.rule(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for CadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

impl From<std::io::Error> for CadError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// A flow failure: the stage it happened in, the design it concerned, and why.
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub design_id: Option<DesignId>,
    pub error: CadError,
}

impl StageError {
    pub fn new(stage: Stage, design_id: Option<&DesignId>, error: CadError) -> Self {
        Self {
            stage,
            design_id: design_id.cloned(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            stage: Some(self.stage),
            design_id: self.design_id.clone(),
            rule: self.error.rule(),
            message: self.error.to_string(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed", self.stage)?;
        if let Some(id) = &self.design_id {
            write!(f, " for design {}", id)?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Serializable form of a failure, rendered by the CLI and the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_id: Option<DesignId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
    pub message: String,
}

pub type CadResult<T> = Result<T, CadError>;
