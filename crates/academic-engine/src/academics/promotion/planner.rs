use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::super::calculator::{GradeCalculator, SessionAverage};
use super::super::domain::{ClassId, Points, SessionId, StudentId, TenantId};
use super::super::errors::{ConfigurationError, EngineError};
use super::super::repository::AcademicRepository;
use super::progression::{ClassProgressionMap, ProgressionStep};
use super::{PromotionMode, PromotionSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Promote,
    Repeat,
    Graduate,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionCandidate {
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: ClassId,
    pub session_average: Option<Points>,
    pub terms_counted: usize,
    pub suggested_action: SuggestedAction,
    pub next_class_id: Option<ClassId>,
    pub promotion_eligible: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreviewCounts {
    pub promote: usize,
    pub repeat: usize,
    pub graduate: usize,
    pub none: usize,
    pub total: usize,
}

impl PreviewCounts {
    fn tally(candidates: &[PromotionCandidate]) -> Self {
        let mut counts = Self::default();
        for candidate in candidates {
            match candidate.suggested_action {
                SuggestedAction::Promote => counts.promote += 1,
                SuggestedAction::Repeat => counts.repeat += 1,
                SuggestedAction::Graduate => counts.graduate += 1,
                SuggestedAction::None => counts.none += 1,
            }
        }
        counts.total = candidates.len();
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionPreview {
    pub session_id: SessionId,
    pub mode: PromotionMode,
    pub counts: PreviewCounts,
    pub candidates: Vec<PromotionCandidate>,
}

/// Suggests an outcome for every student active in a session. Never writes.
pub struct PromotionPlanner<R> {
    repository: Arc<R>,
    calculator: GradeCalculator<R>,
}

impl<R> Clone for PromotionPlanner<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            calculator: self.calculator.clone(),
        }
    }
}

impl<R> PromotionPlanner<R>
where
    R: AcademicRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        let calculator = GradeCalculator::new(Arc::clone(&repository));
        Self {
            repository,
            calculator,
        }
    }

    pub fn preview(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        class: Option<&ClassId>,
    ) -> Result<PromotionPreview, EngineError> {
        let settings = self.settings(tenant)?;
        let candidates = self.plan(tenant, session, class, &settings)?;
        Ok(PromotionPreview {
            session_id: session.clone(),
            mode: settings.mode,
            counts: PreviewCounts::tally(&candidates),
            candidates,
        })
    }

    pub fn candidates(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        class: Option<&ClassId>,
    ) -> Result<Vec<PromotionCandidate>, EngineError> {
        let settings = self.settings(tenant)?;
        self.plan(tenant, session, class, &settings)
    }

    fn settings(&self, tenant: &TenantId) -> Result<PromotionSettings, EngineError> {
        Ok(self
            .repository
            .promotion_settings(tenant)?
            .unwrap_or_default())
    }

    fn plan(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        class_filter: Option<&ClassId>,
        settings: &PromotionSettings,
    ) -> Result<Vec<PromotionCandidate>, EngineError> {
        if self.repository.session(tenant, session)?.is_none() {
            return Err(EngineError::NotFound(format!("academic session {session}")));
        }

        let progression = ClassProgressionMap::from_classes(&self.repository.classes(tenant)?);

        let mut enrollments = self.repository.current_enrollments(tenant, session)?;
        enrollments.retain(|row| class_filter.map_or(true, |class| &row.class_id == class));
        enrollments.sort_by(|a, b| {
            a.class_id
                .cmp(&b.class_id)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        let mut seen = BTreeSet::new();
        let mut candidates = Vec::with_capacity(enrollments.len());

        for row in enrollments {
            if !seen.insert(row.student_id.clone()) {
                continue;
            }
            let Some(student) = self
                .repository
                .student(tenant, &row.student_id)?
                .filter(|student| student.is_active)
            else {
                continue;
            };

            let step = progression.step_for(&row.class_id);
            let needs_average = settings.mode == PromotionMode::PerformanceBased
                && step != Some(&ProgressionStep::Graduate);
            let average = match self.calculator.session_average(
                tenant,
                &student.id,
                &row.class_id,
                session,
            ) {
                Ok(average) => average,
                Err(EngineError::Configuration(error)) if !needs_average => {
                    warn!(tenant = %tenant, student = %student.id, error = %error, "session average unavailable");
                    SessionAverage {
                        student_id: student.id.clone(),
                        session_id: session.clone(),
                        average: None,
                        terms_counted: 0,
                    }
                }
                Err(other) => return Err(other),
            };
            let (suggested_action, next_class_id, promotion_eligible) =
                suggest(settings, step, &row.class_id, average.average)?;

            candidates.push(PromotionCandidate {
                student_id: student.id,
                student_name: student.name,
                class_id: row.class_id,
                session_average: average.average,
                terms_counted: average.terms_counted,
                suggested_action,
                next_class_id,
                promotion_eligible,
            });
        }

        Ok(candidates)
    }
}

type Suggestion = (SuggestedAction, Option<ClassId>, Option<bool>);

fn suggest(
    settings: &PromotionSettings,
    step: Option<&ProgressionStep>,
    class: &ClassId,
    average: Option<Points>,
) -> Result<Suggestion, ConfigurationError> {
    let next = match step {
        Some(ProgressionStep::Graduate) => {
            return Ok((SuggestedAction::Graduate, None, Some(true)));
        }
        Some(ProgressionStep::Next(next)) => Some(next.clone()),
        None => None,
    };

    let eligible = settings.eligibility(class, average)?;
    let suggestion = match (settings.mode, next) {
        (PromotionMode::Manual, _) | (_, None) => (SuggestedAction::None, None, eligible),
        (PromotionMode::Automatic, Some(next)) => (SuggestedAction::Promote, Some(next), eligible),
        (PromotionMode::PerformanceBased, Some(next)) => {
            if eligible == Some(true) {
                (SuggestedAction::Promote, Some(next), eligible)
            } else {
                (SuggestedAction::Repeat, None, eligible)
            }
        }
    };
    Ok(suggestion)
}
