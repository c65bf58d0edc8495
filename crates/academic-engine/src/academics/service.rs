use std::sync::Arc;

use super::calendar::AcademicCalendar;
use super::calculator::{ComputedResult, GradeCalculator};
use super::domain::{
    ActorId, ClassId, SessionId, StudentId, SubjectId, TeacherId, TenantId, TermId,
};
use super::errors::EngineError;
use super::mapping::{ComponentMapper, ComponentMapping, MappingDraft};
use super::promotion::{
    PromotionBatchResult, PromotionDecisionInput, PromotionExecutor, PromotionPlanner,
    PromotionPreview,
};
use super::ranking::{ClassRanker, RankedEntry};
use super::repository::{AcademicRepository, NotificationPublisher};
use super::templates::{GradeTemplate, TemplateDraft, TemplateRegistry};
use crate::config::EngineConfig;

/// Facade composing every grading and promotion component over one repository.
pub struct AcademicEngine<R, N> {
    templates: TemplateRegistry<R>,
    mapper: ComponentMapper<R>,
    calculator: GradeCalculator<R>,
    ranker: ClassRanker<R>,
    planner: PromotionPlanner<R>,
    executor: PromotionExecutor<R, N>,
    calendar: AcademicCalendar<R>,
}

impl<R, N> AcademicEngine<R, N>
where
    R: AcademicRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, config: EngineConfig) -> Self {
        Self {
            templates: TemplateRegistry::new(Arc::clone(&repository)),
            mapper: ComponentMapper::new(Arc::clone(&repository)),
            calculator: GradeCalculator::new(Arc::clone(&repository)),
            ranker: ClassRanker::new(Arc::clone(&repository)),
            planner: PromotionPlanner::new(Arc::clone(&repository)),
            executor: PromotionExecutor::new(
                Arc::clone(&repository),
                notifier,
                config.promotion_item_timeout,
            ),
            calendar: AcademicCalendar::new(repository),
        }
    }

    pub fn templates(&self) -> &TemplateRegistry<R> {
        &self.templates
    }

    pub fn mapper(&self) -> &ComponentMapper<R> {
        &self.mapper
    }

    pub fn calculator(&self) -> &GradeCalculator<R> {
        &self.calculator
    }

    pub fn ranker(&self) -> &ClassRanker<R> {
        &self.ranker
    }

    pub fn planner(&self) -> &PromotionPlanner<R> {
        &self.planner
    }

    pub fn executor(&self) -> &PromotionExecutor<R, N> {
        &self.executor
    }

    pub fn calendar(&self) -> &AcademicCalendar<R> {
        &self.calendar
    }

    pub fn save_template(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        draft: TemplateDraft,
    ) -> Result<GradeTemplate, EngineError> {
        self.templates.save_template(tenant, actor, draft)
    }

    pub fn upsert_mapping(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        draft: MappingDraft,
    ) -> Result<ComponentMapping, EngineError> {
        self.mapper.create_mapping(tenant, teacher, draft)
    }

    pub fn compute_grade(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        subject: &SubjectId,
        term: &TermId,
    ) -> Result<ComputedResult, EngineError> {
        self.calculator.compute_grade(tenant, student, subject, term)
    }

    pub fn rank_class(
        &self,
        tenant: &TenantId,
        class: &ClassId,
        subject: Option<&SubjectId>,
        term: &TermId,
    ) -> Result<Vec<RankedEntry>, EngineError> {
        self.ranker.rank_class(tenant, class, subject, term)
    }

    pub fn preview_promotions(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        class: Option<&ClassId>,
    ) -> Result<PromotionPreview, EngineError> {
        self.planner.preview(tenant, session, class)
    }

    pub async fn execute_promotions(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        actor: &ActorId,
        decisions: Vec<PromotionDecisionInput>,
    ) -> Result<PromotionBatchResult, EngineError> {
        self.executor.execute(tenant, session, actor, decisions).await
    }
}
