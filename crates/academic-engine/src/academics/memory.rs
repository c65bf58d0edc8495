//! Reference store backing the API binary, the demo and the tests.
//!
//! One mutex guards the whole state, so every trait call is a single atomic transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    AcademicSession, ClassId, Exam, ExamId, MappingId, PromotionAction, RawGrade, SchoolClass,
    SessionId, Student, StudentClassHistory, StudentId, TemplateId, TenantId, Term, TermId,
};
use super::mapping::ComponentMapping;
use super::promotion::PromotionSettings;
use super::repository::{
    CommitTicket, EnrollmentRepository, ExamFilter, ExamScore, GradingRepository, MappingFilter,
    PromotionReceipt, PromotionWrite, RepositoryError, ScoreFilter,
};
use super::templates::GradeTemplate;

#[derive(Debug, Default)]
struct State {
    templates: BTreeMap<TemplateId, GradeTemplate>,
    mappings: BTreeMap<MappingId, ComponentMapping>,
    exams: BTreeMap<ExamId, Exam>,
    grades: BTreeMap<ExamId, Vec<RawGrade>>,
    classes: BTreeMap<ClassId, SchoolClass>,
    students: BTreeMap<StudentId, Student>,
    sessions: BTreeMap<SessionId, AcademicSession>,
    terms: BTreeMap<TermId, Term>,
    history: Vec<StudentClassHistory>,
    settings: HashMap<TenantId, PromotionSettings>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryAcademicStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryAcademicStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("academic store mutex poisoned")
    }

    pub fn add_class(&self, class: SchoolClass) {
        self.state().classes.insert(class.id.clone(), class);
    }

    pub fn add_student(&self, student: Student) {
        self.state().students.insert(student.id.clone(), student);
    }

    /// Hard delete, as when a record is purged upstream.
    pub fn remove_student(&self, tenant: &TenantId, id: &StudentId) -> Option<Student> {
        let mut state = self.state();
        let owned = state
            .students
            .get(id)
            .is_some_and(|student| &student.tenant == tenant);
        if owned {
            state.students.remove(id)
        } else {
            None
        }
    }

    pub fn add_session(&self, session: AcademicSession) {
        self.state().sessions.insert(session.id.clone(), session);
    }

    pub fn add_term(&self, term: Term) {
        self.state().terms.insert(term.id.clone(), term);
    }

    pub fn add_enrollment(&self, row: StudentClassHistory) {
        self.state().history.push(row);
    }

    pub fn set_promotion_settings(&self, tenant: &TenantId, settings: PromotionSettings) {
        self.state().settings.insert(tenant.clone(), settings);
    }

    /// Every history row of a student, oldest first.
    pub fn student_history(
        &self,
        tenant: &TenantId,
        student: &StudentId,
    ) -> Vec<StudentClassHistory> {
        self.state()
            .history
            .iter()
            .filter(|row| &row.tenant == tenant && &row.student_id == student)
            .cloned()
            .collect()
    }
}

fn same_tenant<'a, T>(
    value: Option<&'a T>,
    tenant: &TenantId,
    owner: impl Fn(&T) -> &TenantId,
) -> Option<&'a T> {
    value.filter(|item| owner(item) == tenant)
}

impl GradingRepository for InMemoryAcademicStore {
    fn save_template(&self, template: GradeTemplate) -> Result<GradeTemplate, RepositoryError> {
        let mut state = self.state();
        if let Some(existing) = state.templates.get(&template.id) {
            if existing.tenant != template.tenant {
                return Err(RepositoryError::Conflict(format!(
                    "template id {} already in use",
                    template.id
                )));
            }
        }
        if template.is_default {
            for other in state.templates.values_mut() {
                if other.tenant == template.tenant && other.id != template.id {
                    other.is_default = false;
                }
            }
        }
        state.templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }

    fn fetch_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<GradeTemplate>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.templates.get(id), tenant, |t| &t.tenant).cloned())
    }

    fn default_template(&self, tenant: &TenantId) -> Result<Option<GradeTemplate>, RepositoryError> {
        let state = self.state();
        Ok(state
            .templates
            .values()
            .find(|t| &t.tenant == tenant && t.is_default && t.is_active)
            .cloned())
    }

    fn set_default_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<GradeTemplate, RepositoryError> {
        let mut state = self.state();
        let known = same_tenant(state.templates.get(id), tenant, |t| &t.tenant)
            .is_some_and(|t| t.is_active);
        if !known {
            return Err(RepositoryError::NotFound(format!("grade template {id}")));
        }
        let mut updated = None;
        for template in state.templates.values_mut() {
            if &template.tenant != tenant {
                continue;
            }
            template.is_default = &template.id == id;
            if template.is_default {
                updated = Some(template.clone());
            }
        }
        updated.ok_or_else(|| RepositoryError::NotFound(format!("grade template {id}")))
    }

    fn templates(&self, tenant: &TenantId) -> Result<Vec<GradeTemplate>, RepositoryError> {
        let state = self.state();
        Ok(state
            .templates
            .values()
            .filter(|t| &t.tenant == tenant)
            .cloned()
            .collect())
    }

    fn insert_mapping(
        &self,
        mapping: ComponentMapping,
    ) -> Result<ComponentMapping, RepositoryError> {
        let mut state = self.state();
        let duplicate = state.mappings.values().any(|existing| {
            existing.is_active
                && existing.tenant == mapping.tenant
                && existing.teacher_id == mapping.teacher_id
                && existing.subject_id == mapping.subject_id
                && existing.term_id == mapping.term_id
                && existing.exam_type == mapping.exam_type
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "exam type '{}' is already mapped for this teacher, subject and term",
                mapping.exam_type
            )));
        }
        state.mappings.insert(mapping.id.clone(), mapping.clone());
        Ok(mapping)
    }

    fn update_mapping(
        &self,
        mapping: ComponentMapping,
    ) -> Result<ComponentMapping, RepositoryError> {
        let mut state = self.state();
        match state.mappings.get_mut(&mapping.id) {
            Some(existing) if existing.tenant == mapping.tenant => {
                *existing = mapping.clone();
                Ok(mapping)
            }
            _ => Err(RepositoryError::NotFound(format!(
                "component mapping {}",
                mapping.id
            ))),
        }
    }

    fn fetch_mapping(
        &self,
        tenant: &TenantId,
        id: &MappingId,
    ) -> Result<Option<ComponentMapping>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.mappings.get(id), tenant, |m| &m.tenant).cloned())
    }

    fn mappings(
        &self,
        tenant: &TenantId,
        filter: &MappingFilter,
    ) -> Result<Vec<ComponentMapping>, RepositoryError> {
        let state = self.state();
        Ok(state
            .mappings
            .values()
            .filter(|m| m.is_active && &m.tenant == tenant)
            .filter(|m| filter.teacher.as_ref().map_or(true, |t| &m.teacher_id == t))
            .filter(|m| filter.subject.as_ref().map_or(true, |s| &m.subject_id == s))
            .filter(|m| filter.term.as_ref().map_or(true, |t| &m.term_id == t))
            .cloned()
            .collect())
    }

    fn insert_exam(&self, exam: Exam, grades: Vec<RawGrade>) -> Result<Exam, RepositoryError> {
        let mut state = self.state();
        if state.exams.contains_key(&exam.id) {
            return Err(RepositoryError::Conflict(format!("exam {} already exists", exam.id)));
        }
        state.grades.insert(exam.id.clone(), grades);
        state.exams.insert(exam.id.clone(), exam.clone());
        Ok(exam)
    }

    fn exams(&self, tenant: &TenantId, filter: &ExamFilter) -> Result<Vec<Exam>, RepositoryError> {
        let state = self.state();
        Ok(state
            .exams
            .values()
            .filter(|exam| exam_matches(exam, tenant, filter))
            .cloned()
            .collect())
    }

    fn exam_scores(
        &self,
        tenant: &TenantId,
        filter: &ScoreFilter,
    ) -> Result<Vec<ExamScore>, RepositoryError> {
        let state = self.state();
        let exam_filter = ExamFilter {
            teacher: None,
            subject: filter.subject.clone(),
            class: filter.class.clone(),
            term: Some(filter.term.clone()),
        };

        let mut scores = Vec::new();
        for exam in state
            .exams
            .values()
            .filter(|exam| exam_matches(exam, tenant, &exam_filter))
        {
            let graded = state
                .grades
                .get(&exam.id)
                .into_iter()
                .flatten()
                .filter(|grade| grade.student_id == filter.student);
            for grade in graded {
                scores.push(ExamScore {
                    exam: exam.clone(),
                    score: grade.score,
                });
            }
        }
        Ok(scores)
    }
}

fn exam_matches(exam: &Exam, tenant: &TenantId, filter: &ExamFilter) -> bool {
    &exam.tenant == tenant
        && filter.teacher.as_ref().map_or(true, |t| &exam.teacher_id == t)
        && filter.subject.as_ref().map_or(true, |s| &exam.subject_id == s)
        && filter.class.as_ref().map_or(true, |c| &exam.class_id == c)
        && filter.term.as_ref().map_or(true, |t| &exam.term_id == t)
}

impl EnrollmentRepository for InMemoryAcademicStore {
    fn class(&self, tenant: &TenantId, id: &ClassId) -> Result<Option<SchoolClass>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.classes.get(id), tenant, |c| &c.tenant).cloned())
    }

    fn classes(&self, tenant: &TenantId) -> Result<Vec<SchoolClass>, RepositoryError> {
        let state = self.state();
        Ok(state
            .classes
            .values()
            .filter(|c| &c.tenant == tenant)
            .cloned()
            .collect())
    }

    fn student(&self, tenant: &TenantId, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.students.get(id), tenant, |s| &s.tenant).cloned())
    }

    fn session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<Option<AcademicSession>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.sessions.get(id), tenant, |s| &s.tenant).cloned())
    }

    fn sessions(&self, tenant: &TenantId) -> Result<Vec<AcademicSession>, RepositoryError> {
        let state = self.state();
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| &s.tenant == tenant)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.starts_on);
        Ok(sessions)
    }

    fn term(&self, tenant: &TenantId, id: &TermId) -> Result<Option<Term>, RepositoryError> {
        let state = self.state();
        Ok(same_tenant(state.terms.get(id), tenant, |t| &t.tenant).cloned())
    }

    fn terms(&self, tenant: &TenantId, session: &SessionId) -> Result<Vec<Term>, RepositoryError> {
        let state = self.state();
        let mut terms: Vec<_> = state
            .terms
            .values()
            .filter(|t| &t.tenant == tenant && &t.session_id == session)
            .cloned()
            .collect();
        terms.sort_by_key(|t| t.sequence_number);
        Ok(terms)
    }

    fn set_current_session(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<AcademicSession, RepositoryError> {
        let mut state = self.state();
        if same_tenant(state.sessions.get(id), tenant, |s| &s.tenant).is_none() {
            return Err(RepositoryError::NotFound(format!("academic session {id}")));
        }
        let mut updated = None;
        for session in state.sessions.values_mut().filter(|s| &s.tenant == tenant) {
            session.is_current = &session.id == id;
            if session.is_current {
                updated = Some(session.clone());
            }
        }
        updated.ok_or_else(|| RepositoryError::NotFound(format!("academic session {id}")))
    }

    fn set_current_term(&self, tenant: &TenantId, id: &TermId) -> Result<Term, RepositoryError> {
        let mut state = self.state();
        let session_id = match same_tenant(state.terms.get(id), tenant, |t| &t.tenant) {
            Some(term) => term.session_id.clone(),
            None => return Err(RepositoryError::NotFound(format!("term {id}"))),
        };
        let mut updated = None;
        for term in state
            .terms
            .values_mut()
            .filter(|t| &t.tenant == tenant && t.session_id == session_id)
        {
            term.is_current = &term.id == id;
            if term.is_current {
                updated = Some(term.clone());
            }
        }
        updated.ok_or_else(|| RepositoryError::NotFound(format!("term {id}")))
    }

    fn current_enrollments(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError> {
        let state = self.state();
        Ok(state
            .history
            .iter()
            .filter(|row| &row.tenant == tenant && &row.session_id == session && row.is_current)
            .cloned()
            .collect())
    }

    fn session_history(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        session: &SessionId,
    ) -> Result<Vec<StudentClassHistory>, RepositoryError> {
        let state = self.state();
        Ok(state
            .history
            .iter()
            .filter(|row| {
                &row.tenant == tenant && &row.student_id == student && &row.session_id == session
            })
            .cloned()
            .collect())
    }

    fn class_roster(
        &self,
        tenant: &TenantId,
        class: &ClassId,
        session: &SessionId,
    ) -> Result<Vec<StudentId>, RepositoryError> {
        let state = self.state();
        let roster: BTreeSet<StudentId> = state
            .history
            .iter()
            .filter(|row| {
                &row.tenant == tenant && &row.class_id == class && &row.session_id == session
            })
            .map(|row| row.student_id.clone())
            .collect();
        Ok(roster.into_iter().collect())
    }

    fn promotion_settings(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<PromotionSettings>, RepositoryError> {
        Ok(self.state().settings.get(tenant).cloned())
    }

    fn apply_promotion(
        &self,
        write: PromotionWrite,
        ticket: &CommitTicket,
    ) -> Result<PromotionReceipt, RepositoryError> {
        let mut state = self.state();

        let student_known = same_tenant(state.students.get(&write.student_id), &write.tenant, |s| {
            &s.tenant
        })
        .is_some();
        if !student_known {
            return Err(RepositoryError::NotFound(format!("student {}", write.student_id)));
        }

        let in_session = |row: &StudentClassHistory| {
            row.tenant == write.tenant
                && row.student_id == write.student_id
                && row.session_id == write.session_id
        };
        if state.history.iter().any(|row| in_session(row) && row.is_decided()) {
            return Err(RepositoryError::Conflict(format!(
                "student {} already decided for session {}",
                write.student_id, write.session_id
            )));
        }
        let current_index = state
            .history
            .iter()
            .position(|row| in_session(row) && row.is_current)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "current enrollment of student {}",
                    write.student_id
                ))
            })?;

        let opened = match (
            write.action.opens_enrollment(),
            &write.next_class_id,
            &write.next_placement,
        ) {
            (false, _, _) => None,
            (true, Some(class_id), Some((session_id, term_id))) => {
                if same_tenant(state.classes.get(class_id), &write.tenant, |c| &c.tenant).is_none() {
                    return Err(RepositoryError::NotFound(format!("class {class_id}")));
                }
                Some(StudentClassHistory::enroll(
                    write.tenant.clone(),
                    write.student_id.clone(),
                    class_id.clone(),
                    session_id.clone(),
                    term_id.clone(),
                    write.effective_on,
                ))
            }
            (true, _, _) => {
                return Err(RepositoryError::NotFound(format!(
                    "placement for {} in the next session",
                    write.action
                )))
            }
        };

        if !ticket.begin_commit() {
            return Err(RepositoryError::DeadlineExceeded);
        }

        let closed = {
            let row = &mut state.history[current_index];
            row.is_current = false;
            row.completion_date = Some(write.effective_on);
            row.status = write.action.closing_status();
            row.promoted_to_class_id = match write.action {
                PromotionAction::Promote | PromotionAction::Transfer => write.next_class_id.clone(),
                PromotionAction::Repeat | PromotionAction::Graduate => None,
            };
            row.final_average = write.final_average;
            row.promotion_eligible = write.promotion_eligible;
            row.promotion_decision = Some(write.action);
            row.decided_by = Some(write.decided_by.clone());
            row.decision_date = Some(write.decided_at);
            row.clone()
        };

        if let Some(student) = state.students.get_mut(&write.student_id) {
            match write.action {
                PromotionAction::Graduate => student.is_active = false,
                PromotionAction::Promote | PromotionAction::Transfer | PromotionAction::Repeat => {
                    if let Some(class_id) = &write.next_class_id {
                        student.current_class_id = class_id.clone();
                    }
                }
            }
        }

        if let Some(row) = &opened {
            state.history.push(row.clone());
        }
        Ok(PromotionReceipt { closed, opened })
    }

    fn mark_promotion_completed(
        &self,
        tenant: &TenantId,
        session: &SessionId,
    ) -> Result<AcademicSession, RepositoryError> {
        let mut state = self.state();
        match state.sessions.get_mut(session) {
            Some(record) if &record.tenant == tenant => {
                record.promotion_completed = true;
                Ok(record.clone())
            }
            _ => Err(RepositoryError::NotFound(format!("academic session {session}"))),
        }
    }
}
