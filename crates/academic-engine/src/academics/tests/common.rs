use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::academics::domain::next_identifier;
use crate::academics::repository::{
    CommitTicket, EnrollmentRepository, ExamFilter, ExamScore, GradingRepository, MappingFilter,
    Notification, NotificationError, NotificationPublisher, PromotionReceipt, PromotionWrite,
    RepositoryError, ScoreFilter,
};
use crate::academics::{
    AcademicEngine, AcademicSession, ActorId, ClassId, ComponentDraft, ComponentId,
    ComponentMapping, Exam, ExamId, ExamTypeLabel, GradeBand, GradeTemplate,
    InMemoryAcademicStore, MappingDraft, MappingId, Points, PromotionSettings, RawGrade,
    SchoolClass, SessionId, Student, StudentClassHistory, StudentId, SubjectId, TeacherId,
    TemplateDraft, TemplateId, TenantId, Term, TermId,
};
use crate::config::EngineConfig;

pub(super) const TENANT: &str = "greenfield";
pub(super) const SESSION: &str = "ses-2024";
pub(super) const NEXT_SESSION: &str = "ses-2025";

pub(super) fn tenant() -> TenantId {
    TenantId::from(TENANT)
}

pub(super) fn admin() -> ActorId {
    ActorId::from("admin-1")
}

pub(super) fn teacher() -> TeacherId {
    TeacherId::from("t-ada")
}

pub(super) fn math() -> SubjectId {
    SubjectId::from("math")
}

pub(super) fn session() -> SessionId {
    SessionId::from(SESSION)
}

pub(super) fn term(sequence: u8) -> TermId {
    TermId(format!("{SESSION}-t{sequence}"))
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn points(value: f64) -> Points {
    Points::from_f64(value).expect("finite")
}

pub(super) fn label(raw: &str) -> ExamTypeLabel {
    ExamTypeLabel::parse(raw).expect("non-blank label")
}

pub(super) fn band(label: &str, min: f64, max: f64, remark: &str) -> GradeBand {
    GradeBand {
        label: label.to_string(),
        min_score: points(min),
        max_score: points(max),
        remark: remark.to_string(),
        order: 0,
    }
}

/// CA 40 + Exam 60, both required, graded A-F over 100 marks.
pub(super) fn standard_draft() -> TemplateDraft {
    TemplateDraft {
        name: "Standard".to_string(),
        total_marks: Points::HUNDRED,
        is_default: true,
        components: vec![
            ComponentDraft {
                name: "Continuous Assessment".to_string(),
                weight: Points::whole(40),
                is_required: true,
                display_order: Some(1),
            },
            ComponentDraft {
                name: "Exam".to_string(),
                weight: Points::whole(60),
                is_required: true,
                display_order: Some(2),
            },
        ],
        grade_bands: vec![
            band("F", 0.0, 39.99, "Fail"),
            band("D", 40.0, 49.99, "Pass"),
            band("C", 50.0, 59.99, "Credit"),
            band("B", 60.0, 79.99, "{grade} in {subject}: good"),
            band("A", 80.0, 100.0, "{grade} at {percentage}%"),
        ],
        remark_bands: Vec::new(),
    }
}

pub(super) fn component_named(template: &GradeTemplate, name: &str) -> ComponentId {
    template
        .components
        .iter()
        .find(|component| component.name == name)
        .map(|component| component.id.clone())
        .expect("component present")
}

#[derive(Debug, Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp offline".to_string()));
        }
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// A seeded school: JSS1 -> JSS2 -> JSS3 (terminal), two sessions, three terms in the
/// first and one in the second.
pub(super) struct School<R = InMemoryAcademicStore> {
    pub(super) store: InMemoryAcademicStore,
    pub(super) engine: Arc<AcademicEngine<R, MemoryNotifier>>,
    pub(super) notifier: Arc<MemoryNotifier>,
}

pub(super) fn seed_calendar(store: &InMemoryAcademicStore) {
    for (id, level) in [("jss1", 1), ("jss2", 2), ("jss3", 3)] {
        store.add_class(SchoolClass {
            id: ClassId::from(id),
            tenant: tenant(),
            name: id.to_uppercase(),
            level,
            arm: None,
        });
    }

    store.add_session(AcademicSession {
        id: session(),
        tenant: tenant(),
        name: "2024/2025".to_string(),
        starts_on: date(2024, 9, 2),
        is_current: true,
        promotion_completed: false,
    });
    store.add_session(AcademicSession {
        id: SessionId::from(NEXT_SESSION),
        tenant: tenant(),
        name: "2025/2026".to_string(),
        starts_on: date(2025, 9, 1),
        is_current: false,
        promotion_completed: false,
    });

    for sequence in 1..=3 {
        store.add_term(Term {
            id: term(sequence),
            tenant: tenant(),
            session_id: session(),
            name: format!("Term {sequence}"),
            sequence_number: sequence,
            is_current: sequence == 1,
        });
    }
    store.add_term(Term {
        id: TermId(format!("{NEXT_SESSION}-t1")),
        tenant: tenant(),
        session_id: SessionId::from(NEXT_SESSION),
        name: "Term 1".to_string(),
        sequence_number: 1,
        is_current: false,
    });
}

pub(super) fn school() -> School {
    school_with_timeout(EngineConfig::default().promotion_item_timeout)
}

pub(super) fn school_with_timeout(item_timeout: Duration) -> School {
    let store = InMemoryAcademicStore::new();
    seed_calendar(&store);
    let notifier = Arc::new(MemoryNotifier::default());
    let engine = Arc::new(AcademicEngine::new(
        Arc::new(store.clone()),
        Arc::clone(&notifier),
        EngineConfig {
            promotion_item_timeout: item_timeout,
        },
    ));
    School {
        store,
        engine,
        notifier,
    }
}

impl<R> School<R>
where
    R: crate::academics::AcademicRepository + 'static,
{
    pub(super) fn install_template(&self) -> GradeTemplate {
        self.engine
            .save_template(&tenant(), &admin(), standard_draft())
            .expect("standard template saves")
    }

    pub(super) fn enroll(&self, student: &str, class: &str) -> StudentId {
        let id = StudentId::from(student);
        self.store.add_student(Student {
            id: id.clone(),
            tenant: tenant(),
            name: format!("Student {student}"),
            current_class_id: ClassId::from(class),
            is_active: true,
        });
        self.store.add_enrollment(StudentClassHistory::enroll(
            tenant(),
            id.clone(),
            ClassId::from(class),
            session(),
            term(1),
            date(2024, 9, 2),
        ));
        id
    }

    /// Record one exam owned by `teacher` with the given raw scores.
    pub(super) fn exam(
        &self,
        teacher: &TeacherId,
        subject: &SubjectId,
        class: &str,
        term: &TermId,
        exam_type: &str,
        total: i64,
        scores: &[(&str, f64)],
    ) -> Exam {
        let exam = Exam {
            id: ExamId(next_identifier("exam")),
            tenant: tenant(),
            teacher_id: teacher.clone(),
            subject_id: subject.clone(),
            class_id: ClassId::from(class),
            term_id: term.clone(),
            exam_type: label(exam_type),
            total_marks: Points::whole(total),
        };
        let grades = scores
            .iter()
            .map(|(student, score)| RawGrade {
                exam_id: exam.id.clone(),
                student_id: StudentId::from(*student),
                score: points(*score),
            })
            .collect();
        self.store
            .insert_exam(exam, grades)
            .expect("exam inserts")
    }

    pub(super) fn map(
        &self,
        teacher: &TeacherId,
        subject: &SubjectId,
        term: &TermId,
        exam_type: &str,
        component: &ComponentId,
    ) -> ComponentMapping {
        self.engine
            .upsert_mapping(
                &tenant(),
                teacher,
                MappingDraft {
                    subject_id: subject.clone(),
                    term_id: term.clone(),
                    exam_type: label(exam_type),
                    component_id: component.clone(),
                    include_in_calculation: true,
                },
            )
            .expect("mapping creates")
    }

    pub(super) fn set_settings(&self, settings: PromotionSettings) {
        self.store.set_promotion_settings(&tenant(), settings);
    }
}

/// Wraps the in-memory store and stalls every promotion write, or refuses it outright
/// when `outage` is set.
pub(super) struct SlowPromotions {
    pub(super) inner: InMemoryAcademicStore,
    pub(super) delay: Duration,
    pub(super) outage: Option<&'static str>,
}

pub(super) fn slow_school(item_timeout: Duration, delay: Duration) -> School<SlowPromotions> {
    wrapped_school(item_timeout, delay, None)
}

/// Every promotion write fails with `RepositoryError::Unavailable(reason)`.
pub(super) fn unavailable_school(reason: &'static str) -> School<SlowPromotions> {
    wrapped_school(
        EngineConfig::default().promotion_item_timeout,
        Duration::ZERO,
        Some(reason),
    )
}

fn wrapped_school(
    item_timeout: Duration,
    delay: Duration,
    outage: Option<&'static str>,
) -> School<SlowPromotions> {
    let store = InMemoryAcademicStore::new();
    seed_calendar(&store);
    let notifier = Arc::new(MemoryNotifier::default());
    let engine = Arc::new(AcademicEngine::new(
        Arc::new(SlowPromotions {
            inner: store.clone(),
            delay,
            outage,
        }),
        Arc::clone(&notifier),
        EngineConfig {
            promotion_item_timeout: item_timeout,
        },
    ));
    School {
        store,
        engine,
        notifier,
    }
}

impl GradingRepository for SlowPromotions {
    fn save_template(&self, template: GradeTemplate) -> Result<GradeTemplate, RepositoryError> {
        self.inner.save_template(template)
    }

    fn fetch_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<GradeTemplate>, RepositoryError> {
        self.inner.fetch_template(tenant, id)
    }

    fn default_template(&self, tenant: &TenantId) -> Result<Option<GradeTemplate>, RepositoryError> {
        self.inner.default_template(tenant)
    }

    fn set_default_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<GradeTemplate, RepositoryError> {
        self.inner.set_default_template(tenant, id)
    }

    fn templates(&self, tenant: &TenantId) -> Result<Vec<GradeTemplate>, RepositoryError> {
        self.inner.templates(tenant)
    }

    fn insert_mapping(
        &self,
        mapping: ComponentMapping,
    ) -> Result<ComponentMapping, RepositoryError> {
        self.inner.insert_mapping(mapping)
    }

    fn update_mapping(
        &self,
        mapping: ComponentMapping,
    ) -> Result<ComponentMapping, RepositoryError> {
        self.inner.update_mapping(mapping)
    }

    fn fetch_mapping(
        &self,
        tenant: &TenantId,
        id: &MappingId,
    ) -> Result<Option<ComponentMapping>, RepositoryError> {
        self.inner.fetch_mapping(tenant, id)
    }

    fn mappings(
        &self,
        tenant: &TenantId,
        filter: &MappingFilter,
    ) -> Result<Vec<ComponentMapping>, RepositoryError> {
        self.inner.mappings(tenant, filter)
    }

    fn insert_exam(&self, exam: Exam, grades: Vec<RawGrade>) -> Result<Exam, RepositoryError> {
        self.inner.insert_exam(exam, grades)
    }

    fn exams(&self, tenant: &TenantId, filter: &ExamFilter) -> Result<Vec<Exam>, RepositoryError> {
        self.inner.exams(tenant, filter)
    }

    fn exam_scores(
        &self,
        tenant: &TenantId,
        filter: &ScoreFilter,
    ) -> Result<Vec<ExamScore>, RepositoryError> {
        self.inner.exam_scores(tenant, filter)
    }
}

impl EnrollmentRepository for SlowPromotions {
    fn class(&self, tenant: &TenantId, id: &ClassId) -> Result<Option<SchoolClass>, RepositoryError> {
        self.inner.class(tenant, id)
    }

    fn classes(&self, tenant: &TenantId) -> Result<Vec<SchoolClass>, RepositoryError> {
        self.inner.classes(tenant)
    }

    fn student(&self, tenant: &TenantId, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        self.inner.student(tenant, id)
    }

    fn session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<Option<AcademicSession>, RepositoryError> {
        self.inner.session(tenant, id)
    }

    fn sessions(&self, tenant: &TenantId) -> Result<Vec<AcademicSession>, RepositoryError> {
        self.inner.sessions(tenant)
    }

    fn term(&self, tenant: &TenantId, id: &TermId) -> Result<Option<Term>, RepositoryError> {
        self.inner.term(tenant, id)
    }

    fn terms(&self, tenant: &TenantId, session: &SessionId) -> Result<Vec<Term>, RepositoryError> {
        self.inner.terms(tenant, session)
    }

    fn set_current_session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<AcademicSession, RepositoryError> {
        self.inner.set_current_session(tenant, id)
    }

    fn set_current_term(&self, tenant: &TenantId, id: &TermId) -> Result<Term, RepositoryError> {
        self.inner.set_current_term(tenant, id)
    }

    fn current_enrollments(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError> {
        self.inner.current_enrollments(tenant, session)
    }

    fn session_history(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError> {
        self.inner.session_history(tenant, student, session)
    }

    fn class_roster(
        &self,
        tenant: &TenantId,
        class: &ClassId,
        session: &SessionId,
    ) -> Result<Vec<StudentId>, RepositoryError> {
        self.inner.class_roster(tenant, class, session)
    }

    fn promotion_settings(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<PromotionSettings>, RepositoryError> {
        self.inner.promotion_settings(tenant)
    }

    fn apply_promotion(
        &self,
        write: PromotionWrite,
        ticket: &CommitTicket,
    ) -> Result<PromotionReceipt, RepositoryError> {
        if let Some(reason) = self.outage {
            return Err(RepositoryError::Unavailable(reason.to_string()));
        }
        std::thread::sleep(self.delay);
        self.inner.apply_promotion(write, ticket)
    }

    fn mark_promotion_completed(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<AcademicSession, RepositoryError> {
        self.inner.mark_promotion_completed(tenant, session)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
