//! Weighted grade computation over a teacher's component mappings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{
    ClassId, ComponentId, Points, SessionId, StudentId, SubjectId, TemplateId, TenantId, TermId,
};
use super::errors::{ConfigurationError, EngineError};
use super::mapping::{resolve_binding, ComponentMapping, ExamTypeBinding};
use super::repository::{AcademicRepository, ExamScore, MappingFilter, ScoreFilter};
use super::templates::{fill_placeholders, GradeTemplate};

/// Per-component audit line of a computed result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentBreakdown {
    pub component_id: ComponentId,
    pub name: String,
    pub weight: Points,
    pub is_required: bool,
    pub exam_count: usize,
    /// Mean of the contributing scores as fractions of their exams' totals.
    pub average_fraction: Option<f64>,
    pub contribution: Points,
}

/// The weighted outcome of one template applied to a set of scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedGrade {
    pub weighted_score: Points,
    pub weighted_percentage: Points,
    pub resolved_grade_label: String,
    pub resolved_remark: String,
    pub completeness_flag: bool,
    pub missing_required: Vec<ComponentId>,
    pub breakdown: Vec<ComponentBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedResult {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub term_id: TermId,
    pub template_id: TemplateId,
    pub total_marks: Points,
    /// Exams of the subject the student has a score on, mapped or not.
    pub graded_exams: usize,
    #[serde(flatten)]
    pub grade: WeightedGrade,
}

impl ComputedResult {
    pub fn weighted_percentage(&self) -> Points {
        self.grade.weighted_percentage
    }

    pub fn completeness_flag(&self) -> bool {
        self.grade.completeness_flag
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermOverall {
    pub student_id: StudentId,
    pub term_id: TermId,
    pub percentage: Points,
    pub subjects: Vec<SubjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAverage {
    pub student_id: StudentId,
    pub session_id: SessionId,
    pub average: Option<Points>,
    pub terms_counted: usize,
}

/// Combine raw scores into the template's weighted score.
///
/// Components are visited in id order and each component's fractions are sorted before
/// averaging, so the result does not depend on the order of `scores` or of the template's
/// components.
pub fn weighted_grade(
    template: &GradeTemplate,
    mappings: &[ComponentMapping],
    scores: &[ExamScore],
    subject_label: &str,
) -> WeightedGrade {
    let mut fractions: BTreeMap<&ComponentId, Vec<f64>> = BTreeMap::new();
    for score in scores {
        if score.exam.total_marks <= Points::ZERO {
            continue;
        }
        let binding = resolve_binding(
            mappings,
            &score.exam.teacher_id,
            &score.exam.exam_type,
            Some(template),
        );
        if let ExamTypeBinding::Mapped { component_id, .. } = binding {
            if let Some(component) = template.component(&component_id) {
                fractions
                    .entry(&component.id)
                    .or_default()
                    .push(score.score.as_f64() / score.exam.total_marks.as_f64());
            }
        }
    }

    let mut components: Vec<_> = template.components.iter().collect();
    components.sort_by(|a, b| a.id.cmp(&b.id));

    let mut raw_total = 0.0_f64;
    let mut missing_required = Vec::new();
    let mut breakdown = Vec::with_capacity(components.len());

    for component in components {
        let mut values = fractions.remove(&component.id).unwrap_or_default();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let average = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };

        let contribution = average.unwrap_or(0.0) * component.weight.as_f64();
        raw_total += contribution;

        if average.is_none() && component.is_required {
            missing_required.push(component.id.clone());
        }

        breakdown.push(ComponentBreakdown {
            component_id: component.id.clone(),
            name: component.name.clone(),
            weight: component.weight,
            is_required: component.is_required,
            exam_count: values.len(),
            average_fraction: average,
            contribution: Points::from_f64(contribution).unwrap_or(Points::ZERO),
        });
    }

    breakdown.sort_by_key(|line| {
        template
            .component(&line.component_id)
            .map(|component| component.display_order)
            .unwrap_or(u16::MAX)
    });

    let weighted_score = Points::from_f64(raw_total)
        .unwrap_or(Points::ZERO)
        .clamp_to(Points::ZERO, template.total_marks);
    let weighted_percentage = weighted_score.percentage_of(template.total_marks);

    let grade_band = template.grade_band_for(weighted_score);
    let resolved_grade_label = grade_band
        .map(|band| band.label.clone())
        .unwrap_or_default();

    let resolved_remark = if template.remark_bands.is_empty() {
        grade_band
            .map(|band| {
                fill_placeholders(
                    &band.remark,
                    &resolved_grade_label,
                    weighted_percentage,
                    subject_label,
                )
            })
            .unwrap_or_default()
    } else {
        template
            .remark_band_for(weighted_percentage)
            .map(|band| band.render(&resolved_grade_label, weighted_percentage, subject_label))
            .unwrap_or_default()
    };

    WeightedGrade {
        weighted_score,
        weighted_percentage,
        resolved_grade_label,
        resolved_remark,
        completeness_flag: missing_required.is_empty(),
        missing_required,
        breakdown,
    }
}

/// Reads configuration and scores on every call and applies [`weighted_grade`].
pub struct GradeCalculator<R> {
    repository: Arc<R>,
}

impl<R> Clone for GradeCalculator<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> GradeCalculator<R>
where
    R: AcademicRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn compute_grade(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        subject: &SubjectId,
        term: &TermId,
    ) -> Result<ComputedResult, EngineError> {
        self.compute_scoped(tenant, student, subject, term, None)
    }

    /// Mean subject percentage over every subject with at least one graded exam in the
    /// term. Subjects without a configured mapping are skipped.
    pub fn term_overall(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        class: &ClassId,
        term: &TermId,
    ) -> Result<Option<TermOverall>, EngineError> {
        let scores = self.repository.exam_scores(
            tenant,
            &ScoreFilter {
                student: student.clone(),
                term: term.clone(),
                subject: None,
                class: Some(class.clone()),
            },
        )?;

        let subjects: BTreeSet<SubjectId> = scores
            .iter()
            .map(|score| score.exam.subject_id.clone())
            .collect();

        let mut percentages = Vec::new();
        let mut counted = Vec::new();
        for subject in subjects {
            match self.compute_scoped(tenant, student, &subject, term, Some(class)) {
                Ok(result) => {
                    percentages.push(result.weighted_percentage());
                    counted.push(subject);
                }
                Err(EngineError::Configuration(ConfigurationError::MappingNotConfigured {
                    ..
                })) => {
                    warn!(
                        tenant = %tenant,
                        student = %student,
                        subject = %subject,
                        term = %term,
                        "subject skipped from term overall: no component mapping configured"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        Ok(Points::mean(percentages).map(|percentage| TermOverall {
            student_id: student.clone(),
            term_id: term.clone(),
            percentage,
            subjects: counted,
        }))
    }

    /// Mean of the session's term overalls; terms without a result are left out.
    pub fn session_average(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        class: &ClassId,
        session: &SessionId,
    ) -> Result<SessionAverage, EngineError> {
        let mut overalls = Vec::new();
        for term in self.repository.terms(tenant, session)? {
            if let Some(overall) = self.term_overall(tenant, student, class, &term.id)? {
                overalls.push(overall.percentage);
            }
        }

        Ok(SessionAverage {
            student_id: student.clone(),
            session_id: session.clone(),
            terms_counted: overalls.len(),
            average: Points::mean(overalls),
        })
    }

    fn compute_scoped(
        &self,
        tenant: &TenantId,
        student: &StudentId,
        subject: &SubjectId,
        term: &TermId,
        class: Option<&ClassId>,
    ) -> Result<ComputedResult, EngineError> {
        let template = self
            .repository
            .default_template(tenant)?
            .filter(|template| template.is_active)
            .ok_or(ConfigurationError::NoDefaultTemplate)?;

        let mappings = self.repository.mappings(
            tenant,
            &MappingFilter {
                teacher: None,
                subject: Some(subject.clone()),
                term: Some(term.clone()),
            },
        )?;
        if mappings.is_empty() {
            return Err(ConfigurationError::MappingNotConfigured {
                subject: subject.clone(),
                term: term.clone(),
            }
            .into());
        }

        let scores = self.repository.exam_scores(
            tenant,
            &ScoreFilter {
                student: student.clone(),
                term: term.clone(),
                subject: Some(subject.clone()),
                class: class.cloned(),
            },
        )?;

        let grade = weighted_grade(&template, &mappings, &scores, subject.as_str());
        debug!(
            tenant = %tenant,
            student = %student,
            subject = %subject,
            term = %term,
            percentage = %grade.weighted_percentage,
            complete = grade.completeness_flag,
            "grade computed"
        );

        Ok(ComputedResult {
            student_id: student.clone(),
            subject_id: subject.clone(),
            term_id: term.clone(),
            template_id: template.id.clone(),
            total_marks: template.total_marks,
            graded_exams: scores.len(),
            grade,
        })
    }
}
