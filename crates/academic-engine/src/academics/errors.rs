use std::fmt;

use serde::Serialize;

use super::domain::{ClassId, Points, SessionId, SubjectId, TemplateId, TermId};
use super::repository::RepositoryError;

/// Which partition a band validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandKind {
    Grade,
    Remark,
}

impl fmt::Display for BandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandKind::Grade => f.write_str("grade scale"),
            BandKind::Remark => f.write_str("remark"),
        }
    }
}

/// Invalid or missing grading configuration. Always raised before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("template total marks must be positive (found {total})")]
    NonPositiveTotal { total: Points },
    #[error("template must define at least one assessment component")]
    NoComponents,
    #[error("component '{component}' must have a positive weight (found {weight})")]
    NonPositiveWeight { component: String, weight: Points },
    #[error("component name '{component}' is used more than once")]
    DuplicateComponent { component: String },
    #[error("component weights sum to {actual} but the template total is {expected}")]
    WeightSumMismatch { expected: Points, actual: Points },
    #[error("{kind} bands must not be empty")]
    NoBands { kind: BandKind },
    #[error("{kind} band label must not be blank")]
    BlankBandLabel { kind: BandKind },
    #[error("{kind} band '{label}' has min {min} above max {max}")]
    InvertedBand {
        kind: BandKind,
        label: String,
        min: Points,
        max: Points,
    },
    #[error("{kind} bands must start at {expected} (first band starts at {found})")]
    UncoveredStart {
        kind: BandKind,
        expected: Points,
        found: Points,
    },
    #[error("{kind} bands leave a gap after '{after}': next band starts at {found}, expected {expected}")]
    BandGap {
        kind: BandKind,
        after: String,
        expected: Points,
        found: Points,
    },
    #[error("{kind} bands overlap after '{after}': next band starts at {found}, expected {expected}")]
    BandOverlap {
        kind: BandKind,
        after: String,
        expected: Points,
        found: Points,
    },
    #[error("{kind} bands must end at {expected} (last band ends at {found})")]
    UncoveredEnd {
        kind: BandKind,
        expected: Points,
        found: Points,
    },
    #[error("tenant has no active default grade template")]
    NoDefaultTemplate,
    #[error("grade template {template} is not active")]
    TemplateInactive { template: TemplateId },
    #[error("no component mapping is configured for subject {subject} in term {term}")]
    MappingNotConfigured { subject: SubjectId, term: TermId },
    #[error("performance-based promotion has no minimum average for class {class}")]
    ThresholdMissing { class: ClassId },
    #[error("no session with terms follows session {session}; configure the next session first")]
    NextSessionMissing { session: SessionId },
}

/// Error surfaced by the engine's operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable discriminator for API payloads and batch reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Invalid(_) => "invalid",
            EngineError::Storage(_) => "storage",
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => EngineError::Conflict(message),
            RepositoryError::NotFound(message) => EngineError::NotFound(message),
            RepositoryError::DeadlineExceeded => {
                EngineError::Storage("deadline exceeded before commit".to_string())
            }
            RepositoryError::Unavailable(message) => EngineError::Storage(message),
        }
    }
}
