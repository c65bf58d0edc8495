//! Grading configuration, weighted grade computation, ranking and promotion.
//!
//! Services are generic over the storage traits in [`repository`] and re-read
//! configuration on every call. [`memory::InMemoryAcademicStore`] is the reference
//! implementation used by the API binary and the tests.

pub mod calculator;
pub mod calendar;
pub mod domain;
pub mod errors;
pub mod import;
pub mod mapping;
pub mod memory;
pub(crate) mod normalizer;
pub mod promotion;
pub mod ranking;
pub mod repository;
pub mod router;
pub mod service;
pub mod templates;

#[cfg(test)]
mod tests;

pub use calculator::{
    weighted_grade, ComponentBreakdown, ComputedResult, GradeCalculator, SessionAverage,
    TermOverall, WeightedGrade,
};
pub use calendar::AcademicCalendar;
pub use domain::{
    AcademicSession, ActorId, ClassId, ComponentId, EnrollmentStatus, Exam, ExamId,
    ExamTypeLabel, HistoryId, MappingId, Points, PromotionAction, RawGrade, SchoolClass,
    SessionId, Student, StudentClassHistory, StudentId, SubjectId, TeacherId, TemplateId,
    TenantId, Term, TermId,
};
pub use errors::{BandKind, ConfigurationError, EngineError};
pub use import::{ExamHeader, ImportError, ImportedScoreSheet, ScoreSheetImporter};
pub use mapping::{
    resolve_binding, ComponentMapper, ComponentMapping, ComponentProjection, ExamTypeBinding,
    ExamTypeUsage, MappingChanges, MappingDraft, MappingPreview,
};
pub use memory::InMemoryAcademicStore;
pub use promotion::{
    ClassProgressionMap, FailureKind, ItemFailure, ItemStatus, PreviewCounts, ProgressionStep,
    PromotionBatchResult, PromotionCandidate, PromotionDecisionInput, PromotionExecutor,
    PromotionItemResult, PromotionMode, PromotionPlanner, PromotionPreview, PromotionSettings,
    SuggestedAction,
};
pub use ranking::{rank, ClassRanker, RankedEntry};
pub use repository::{
    AcademicRepository, CommitTicket, EnrollmentRepository, ExamFilter, ExamScore,
    GradingRepository, MappingFilter, Notification, NotificationError, NotificationPublisher,
    PromotionReceipt, PromotionWrite, RepositoryError, ScoreFilter,
};
pub use router::{academic_router, ACTOR_HEADER, TENANT_HEADER};
pub use service::AcademicEngine;
pub use templates::{
    validate_draft, AssessmentComponent, ComponentDraft, GradeBand, GradeTemplate, RemarkBand,
    TemplateDraft, TemplateRegistry,
};
