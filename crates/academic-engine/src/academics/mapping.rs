//! Teacher exam-type labels projected onto a template's standard components.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    next_identifier, ComponentId, Exam, ExamTypeLabel, MappingId, Points, SubjectId, TeacherId,
    TemplateId, TenantId, TermId,
};
use super::errors::EngineError;
use super::repository::{ExamFilter, GradingRepository, MappingFilter};
use super::templates::GradeTemplate;

/// `(teacher, subject, term, exam type) -> component`; unique among active rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMapping {
    pub id: MappingId,
    pub tenant: TenantId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub term_id: TermId,
    pub exam_type: ExamTypeLabel,
    pub component_id: ComponentId,
    pub include_in_calculation: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComponentMapping {
    fn covers(&self, teacher: &TeacherId, exam_type: &ExamTypeLabel) -> bool {
        self.is_active && &self.teacher_id == teacher && &self.exam_type == exam_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDraft {
    pub subject_id: SubjectId,
    pub term_id: TermId,
    pub exam_type: ExamTypeLabel,
    pub component_id: ComponentId,
    #[serde(default = "included")]
    pub include_in_calculation: bool,
}

fn included() -> bool {
    true
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingChanges {
    #[serde(default)]
    pub component_id: Option<ComponentId>,
    #[serde(default)]
    pub include_in_calculation: Option<bool>,
}

/// How one exam type takes part in grading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExamTypeBinding {
    Mapped {
        component_id: ComponentId,
        mapping_id: MappingId,
    },
    Excluded {
        mapping_id: MappingId,
    },
    Unmapped,
}

impl ExamTypeBinding {
    pub fn component(&self) -> Option<&ComponentId> {
        match self {
            ExamTypeBinding::Mapped { component_id, .. } => Some(component_id),
            ExamTypeBinding::Excluded { .. } | ExamTypeBinding::Unmapped => None,
        }
    }
}

/// Resolve an exam type through its owning teacher's mappings.
///
/// With a template, mappings that point outside it count as unmapped.
pub fn resolve_binding(
    mappings: &[ComponentMapping],
    teacher: &TeacherId,
    exam_type: &ExamTypeLabel,
    template: Option<&GradeTemplate>,
) -> ExamTypeBinding {
    let Some(mapping) = mappings.iter().find(|m| m.covers(teacher, exam_type)) else {
        return ExamTypeBinding::Unmapped;
    };

    if !mapping.include_in_calculation {
        return ExamTypeBinding::Excluded {
            mapping_id: mapping.id.clone(),
        };
    }

    match template {
        Some(template) if template.component(&mapping.component_id).is_none() => {
            ExamTypeBinding::Unmapped
        }
        _ => ExamTypeBinding::Mapped {
            component_id: mapping.component_id.clone(),
            mapping_id: mapping.id.clone(),
        },
    }
}

/// An exam type used by a teacher's exams and how it is currently bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamTypeUsage {
    pub exam_type: ExamTypeLabel,
    pub exam_count: usize,
    pub binding: ExamTypeBinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentProjection {
    pub component_id: ComponentId,
    pub name: String,
    pub weight: Points,
    pub is_required: bool,
    pub exam_types: Vec<ExamTypeLabel>,
    pub exam_count: usize,
}

/// What the teacher's current mappings would feed into a chosen template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingPreview {
    pub template_id: TemplateId,
    pub components: Vec<ComponentProjection>,
    pub unmapped: Vec<ExamTypeLabel>,
    pub excluded: Vec<ExamTypeLabel>,
    pub outside_template: Vec<ExamTypeLabel>,
}

/// Teacher-facing mapping operations.
pub struct ComponentMapper<R> {
    repository: Arc<R>,
}

impl<R> Clone for ComponentMapper<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> ComponentMapper<R>
where
    R: GradingRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn create_mapping(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        draft: MappingDraft,
    ) -> Result<ComponentMapping, EngineError> {
        let owned = self.teacher_exams(tenant, teacher, &draft.subject_id, &draft.term_id)?;
        if !owned.iter().any(|exam| exam.exam_type == draft.exam_type) {
            return Err(EngineError::Forbidden(format!(
                "exam type '{}' is not used by any of teacher {teacher}'s exams for this subject and term",
                draft.exam_type
            )));
        }

        self.ensure_component(tenant, &draft.component_id)?;

        let now = Utc::now();
        let mapping = ComponentMapping {
            id: MappingId(next_identifier("map")),
            tenant: tenant.clone(),
            teacher_id: teacher.clone(),
            subject_id: draft.subject_id,
            term_id: draft.term_id,
            exam_type: draft.exam_type,
            component_id: draft.component_id,
            include_in_calculation: draft.include_in_calculation,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repository.insert_mapping(mapping)?;
        info!(
            tenant = %tenant,
            teacher = %teacher,
            mapping = %stored.id,
            exam_type = %stored.exam_type,
            component = %stored.component_id,
            "component mapping created"
        );
        Ok(stored)
    }

    pub fn update_mapping(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        id: &MappingId,
        changes: MappingChanges,
    ) -> Result<ComponentMapping, EngineError> {
        let mut mapping = self.owned_mapping(tenant, teacher, id)?;

        if let Some(component_id) = changes.component_id {
            self.ensure_component(tenant, &component_id)?;
            mapping.component_id = component_id;
        }
        if let Some(include) = changes.include_in_calculation {
            mapping.include_in_calculation = include;
        }
        mapping.updated_at = Utc::now();

        Ok(self.repository.update_mapping(mapping)?)
    }

    pub fn deactivate_mapping(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        id: &MappingId,
    ) -> Result<ComponentMapping, EngineError> {
        let mut mapping = self.owned_mapping(tenant, teacher, id)?;
        mapping.is_active = false;
        mapping.updated_at = Utc::now();
        let stored = self.repository.update_mapping(mapping)?;
        info!(tenant = %tenant, mapping = %stored.id, "component mapping deactivated");
        Ok(stored)
    }

    pub fn list_mappings(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        subject: &SubjectId,
        term: &TermId,
    ) -> Result<Vec<ComponentMapping>, EngineError> {
        let mut mappings = self.repository.mappings(
            tenant,
            &MappingFilter {
                teacher: Some(teacher.clone()),
                subject: Some(subject.clone()),
                term: Some(term.clone()),
            },
        )?;
        mappings.sort_by(|a, b| a.exam_type.cmp(&b.exam_type));
        Ok(mappings)
    }

    /// Exam types the teacher actually used, each with its binding and exam count.
    pub fn exam_types(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        subject: &SubjectId,
        term: &TermId,
    ) -> Result<Vec<ExamTypeUsage>, EngineError> {
        let exams = self.teacher_exams(tenant, teacher, subject, term)?;
        let mappings = self.list_mappings(tenant, teacher, subject, term)?;

        let usage = count_by_type(&exams)
            .into_iter()
            .map(|(exam_type, exam_count)| {
                let binding = resolve_binding(&mappings, teacher, &exam_type, None);
                ExamTypeUsage {
                    exam_type,
                    exam_count,
                    binding,
                }
            })
            .collect();
        Ok(usage)
    }

    pub fn preview(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        subject: &SubjectId,
        term: &TermId,
        template_id: &TemplateId,
    ) -> Result<MappingPreview, EngineError> {
        let template = self
            .repository
            .fetch_template(tenant, template_id)?
            .ok_or_else(|| EngineError::NotFound(format!("grade template {template_id}")))?;

        let exams = self.teacher_exams(tenant, teacher, subject, term)?;
        let mappings = self.list_mappings(tenant, teacher, subject, term)?;

        let mut per_component: BTreeMap<ComponentId, (BTreeSet<ExamTypeLabel>, usize)> =
            BTreeMap::new();
        let mut unmapped = Vec::new();
        let mut excluded = Vec::new();
        let mut outside_template = Vec::new();

        for (exam_type, count) in count_by_type(&exams) {
            match resolve_binding(&mappings, teacher, &exam_type, None) {
                ExamTypeBinding::Mapped { component_id, .. } => {
                    if template.component(&component_id).is_some() {
                        let entry = per_component.entry(component_id).or_default();
                        entry.0.insert(exam_type);
                        entry.1 += count;
                    } else {
                        outside_template.push(exam_type);
                    }
                }
                ExamTypeBinding::Excluded { .. } => excluded.push(exam_type),
                ExamTypeBinding::Unmapped => unmapped.push(exam_type),
            }
        }

        let mut components: Vec<ComponentProjection> = template
            .components
            .iter()
            .map(|component| {
                let (types, exam_count) = per_component
                    .remove(&component.id)
                    .unwrap_or_default();
                ComponentProjection {
                    component_id: component.id.clone(),
                    name: component.name.clone(),
                    weight: component.weight,
                    is_required: component.is_required,
                    exam_types: types.into_iter().collect(),
                    exam_count,
                }
            })
            .collect();
        components.sort_by_key(|projection| {
            template
                .component(&projection.component_id)
                .map(|component| component.display_order)
                .unwrap_or(u16::MAX)
        });

        Ok(MappingPreview {
            template_id: template.id,
            components,
            unmapped,
            excluded,
            outside_template,
        })
    }

    fn teacher_exams(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        subject: &SubjectId,
        term: &TermId,
    ) -> Result<Vec<Exam>, EngineError> {
        Ok(self.repository.exams(
            tenant,
            &ExamFilter {
                teacher: Some(teacher.clone()),
                subject: Some(subject.clone()),
                class: None,
                term: Some(term.clone()),
            },
        )?)
    }

    fn owned_mapping(
        &self,
        tenant: &TenantId,
        teacher: &TeacherId,
        id: &MappingId,
    ) -> Result<ComponentMapping, EngineError> {
        let mapping = self
            .repository
            .fetch_mapping(tenant, id)?
            .filter(|mapping| mapping.is_active)
            .ok_or_else(|| EngineError::NotFound(format!("component mapping {id}")))?;
        if &mapping.teacher_id != teacher {
            return Err(EngineError::Forbidden(format!(
                "component mapping {id} belongs to another teacher"
            )));
        }
        Ok(mapping)
    }

    fn ensure_component(
        &self,
        tenant: &TenantId,
        component_id: &ComponentId,
    ) -> Result<(), EngineError> {
        let known = self
            .repository
            .templates(tenant)?
            .iter()
            .filter(|template| template.is_active)
            .any(|template| template.component(component_id).is_some());
        if known {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "assessment component {component_id}"
            )))
        }
    }
}

fn count_by_type(exams: &[Exam]) -> BTreeMap<ExamTypeLabel, usize> {
    let mut counts = BTreeMap::new();
    for exam in exams {
        *counts.entry(exam.exam_type.clone()).or_insert(0) += 1;
    }
    counts
}
