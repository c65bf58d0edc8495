use std::sync::Arc;

use serde::Serialize;

use super::calculator::GradeCalculator;
use super::domain::{ClassId, Points, StudentId, SubjectId, TenantId, TermId};
use super::errors::EngineError;
use super::repository::AcademicRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    pub student_id: StudentId,
    pub score: Points,
    pub rank: u32,
}

/// Standard competition ranking: `rank = 1 + entries with a strictly higher score`.
///
/// Output is sorted by score descending, then student id ascending.
pub fn rank(entries: Vec<(StudentId, Points)>) -> Vec<RankedEntry> {
    let mut entries = entries;
    entries.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score.cmp(a_score).then_with(|| a_id.cmp(b_id))
    });

    let mut ranked = Vec::with_capacity(entries.len());
    let mut current_rank = 0_u32;
    let mut previous: Option<Points> = None;

    for (position, (student_id, score)) in entries.into_iter().enumerate() {
        if previous != Some(score) {
            current_rank = u32::try_from(position).unwrap_or(u32::MAX).saturating_add(1);
            previous = Some(score);
        }
        ranked.push(RankedEntry {
            student_id,
            score,
            rank: current_rank,
        });
    }

    ranked
}

/// Positions a class's students by subject result or by term overall.
pub struct ClassRanker<R> {
    repository: Arc<R>,
    calculator: GradeCalculator<R>,
}

impl<R> Clone for ClassRanker<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            calculator: self.calculator.clone(),
        }
    }
}

impl<R> ClassRanker<R>
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

    /// Students without a result are left out of the ranking.
    pub fn rank_class(
        &self,
        tenant: &TenantId,
        class: &ClassId,
        subject: Option<&SubjectId>,
        term: &TermId,
    ) -> Result<Vec<RankedEntry>, EngineError> {
        let term_record = self
            .repository
            .term(tenant, term)?
            .ok_or_else(|| EngineError::NotFound(format!("term {term}")))?;
        if self.repository.class(tenant, class)?.is_none() {
            return Err(EngineError::NotFound(format!("class {class}")));
        }

        let roster = self
            .repository
            .class_roster(tenant, class, &term_record.session_id)?;

        let mut scored = Vec::with_capacity(roster.len());
        for student in roster {
            let score = match subject {
                Some(subject) => {
                    let result = self.calculator.compute_grade(tenant, &student, subject, term)?;
                    (result.graded_exams > 0).then(|| result.weighted_percentage())
                }
                None => self
                    .calculator
                    .term_overall(tenant, &student, class, term)?
                    .map(|overall| overall.percentage),
            };
            if let Some(score) = score {
                scored.push((student, score));
            }
        }

        Ok(rank(scored))
    }
}
