use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AcademicSession, ActorId, ClassId, Exam, ExamId, MappingId, Points, PromotionAction,
    RawGrade, SchoolClass, SessionId, Student, StudentClassHistory, StudentId, SubjectId,
    TeacherId, TemplateId, TenantId, Term, TermId,
};
use super::mapping::ComponentMapping;
use super::promotion::PromotionSettings;
use super::templates::GradeTemplate;

/// Storage for grading configuration and the raw gradebook.
///
/// Every call is one transaction: implementations must apply each write atomically.
pub trait GradingRepository: Send + Sync {
    /// Insert or replace a template. When the template is default, every other template of
    /// the tenant loses its default flag in the same write.
    fn save_template(&self, template: GradeTemplate) -> Result<GradeTemplate, RepositoryError>;
    fn fetch_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<GradeTemplate>, RepositoryError>;
    /// The tenant's active default template, if any.
    fn default_template(&self, tenant: &TenantId) -> Result<Option<GradeTemplate>, RepositoryError>;
    fn set_default_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<GradeTemplate, RepositoryError>;
    fn templates(&self, tenant: &TenantId) -> Result<Vec<GradeTemplate>, RepositoryError>;

    /// Fails with `Conflict` when an active mapping already covers the same
    /// (teacher, subject, term, exam type).
    fn insert_mapping(&self, mapping: ComponentMapping)
        -> Result<ComponentMapping, RepositoryError>;
    fn update_mapping(&self, mapping: ComponentMapping)
        -> Result<ComponentMapping, RepositoryError>;
    fn fetch_mapping(
        &self,
        tenant: &TenantId,
        id: &MappingId,
    ) -> Result<Option<ComponentMapping>, RepositoryError>;
    /// Active mappings matching the filter.
    fn mappings(
        &self,
        tenant: &TenantId,
        filter: &MappingFilter,
    ) -> Result<Vec<ComponentMapping>, RepositoryError>;

    fn insert_exam(&self, exam: Exam, grades: Vec<RawGrade>) -> Result<Exam, RepositoryError>;
    fn exams(&self, tenant: &TenantId, filter: &ExamFilter) -> Result<Vec<Exam>, RepositoryError>;
    /// One student's scores joined with their exams.
    fn exam_scores(
        &self,
        tenant: &TenantId,
        filter: &ScoreFilter,
    ) -> Result<Vec<ExamScore>, RepositoryError>;
}

/// Storage for the school calendar, enrollments and promotion bookkeeping.
pub trait EnrollmentRepository: Send + Sync {
    fn class(&self, tenant: &TenantId, id: &ClassId) -> Result<Option<SchoolClass>, RepositoryError>;
    fn classes(&self, tenant: &TenantId) -> Result<Vec<SchoolClass>, RepositoryError>;
    fn student(&self, tenant: &TenantId, id: &StudentId)
        -> Result<Option<Student>, RepositoryError>;

    fn session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<Option<AcademicSession>, RepositoryError>;
    fn sessions(&self, tenant: &TenantId) -> Result<Vec<AcademicSession>, RepositoryError>;
    fn term(&self, tenant: &TenantId, id: &TermId) -> Result<Option<Term>, RepositoryError>;
    /// Terms of a session ordered by sequence number.
    fn terms(&self, tenant: &TenantId, session: &SessionId) -> Result<Vec<Term>, RepositoryError>;
    /// Clears the previous current session in the same write.
    fn set_current_session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<AcademicSession, RepositoryError>;
    /// Clears the previous current term of the same session in the same write.
    fn set_current_term(&self, tenant: &TenantId, id: &TermId) -> Result<Term, RepositoryError>;

    /// Rows with `is_current=true` attached to the session.
    fn current_enrollments(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError>;
    fn session_history(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError>;
    /// Students holding any enrollment row for the class in the session.
    fn class_roster(
        &self,
        tenant: &TenantId,
        class: &ClassId,
        session: &SessionId,
    ) -> Result<Vec<StudentId>, RepositoryError>;

    fn promotion_settings(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<PromotionSettings>, RepositoryError>;
    /// Close the student's current row and open the follow-up row in one write.
    ///
    /// Implementations validate first, then call [`CommitTicket::begin_commit`]; when the
    /// ticket was cancelled they must return `DeadlineExceeded` without writing anything.
    fn apply_promotion(
        &self,
        write: PromotionWrite,
        ticket: &CommitTicket,
    ) -> Result<PromotionReceipt, RepositoryError>;
    fn mark_promotion_completed(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<AcademicSession, RepositoryError>;
}

/// Both storage seams; what the calculator and promotion services need.
pub trait AcademicRepository: GradingRepository + EnrollmentRepository {}

impl<T> AcademicRepository for T where T: GradingRepository + EnrollmentRepository {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFilter {
    pub teacher: Option<TeacherId>,
    pub subject: Option<SubjectId>,
    pub term: Option<TermId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExamFilter {
    pub teacher: Option<TeacherId>,
    pub subject: Option<SubjectId>,
    pub class: Option<ClassId>,
    pub term: Option<TermId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreFilter {
    pub student: StudentId,
    pub term: TermId,
    pub subject: Option<SubjectId>,
    pub class: Option<ClassId>,
}

/// A raw score together with the exam it was recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamScore {
    pub exam: Exam,
    pub score: Points,
}

impl ExamScore {
    pub fn exam_id(&self) -> &ExamId {
        &self.exam.id
    }
}

/// Everything needed to close one enrollment and open its successor.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionWrite {
    pub tenant: TenantId,
    pub student_id: StudentId,
    pub session_id: SessionId,
    pub action: PromotionAction,
    /// Class of the follow-up enrollment; `None` for graduation.
    pub next_class_id: Option<ClassId>,
    /// Session and term the follow-up enrollment attaches to.
    pub next_placement: Option<(SessionId, TermId)>,
    pub final_average: Option<Points>,
    pub promotion_eligible: Option<bool>,
    pub decided_by: ActorId,
    pub decided_at: DateTime<Utc>,
    pub effective_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionReceipt {
    pub closed: StudentClassHistory,
    pub opened: Option<StudentClassHistory>,
}

const TICKET_PENDING: u8 = 0;
const TICKET_COMMITTING: u8 = 1;
const TICKET_CANCELLED: u8 = 2;

/// Shared between the executor and one storage write so that exactly one of
/// "commit" and "time out" wins.
#[derive(Debug, Clone, Default)]
pub struct CommitTicket {
    state: Arc<AtomicU8>,
}

impl CommitTicket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by storage right before mutating. `false` means the caller gave up.
    pub fn begin_commit(&self) -> bool {
        self.state
            .compare_exchange(
                TICKET_PENDING,
                TICKET_COMMITTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Called by the executor on timeout. `false` means the write is already underway.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(
                TICKET_PENDING,
                TICKET_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == TICKET_CANCELLED
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("write abandoned: item deadline passed before commit")]
    DeadlineExceeded,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Trait describing outbound notification hooks (e-mail, SMS or in-app adapters).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Notification payload so routes/tests can assert integration boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub template: String,
    pub tenant: TenantId,
    pub session_id: SessionId,
    pub details: BTreeMap<String, String>,
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
