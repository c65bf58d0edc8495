mod registry;
mod validation;

pub use registry::TemplateRegistry;
pub use validation::validate_draft;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ActorId, ComponentId, Points, TemplateId, TenantId};

/// A tenant's configurable scoring scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeTemplate {
    pub id: TemplateId,
    pub tenant: TenantId,
    pub name: String,
    pub total_marks: Points,
    pub is_default: bool,
    pub is_active: bool,
    pub components: Vec<AssessmentComponent>,
    pub grade_bands: Vec<GradeBand>,
    pub remark_bands: Vec<RemarkBand>,
    pub updated_by: ActorId,
    pub updated_at: DateTime<Utc>,
}

impl GradeTemplate {
    pub fn component(&self, id: &ComponentId) -> Option<&AssessmentComponent> {
        self.components.iter().find(|component| &component.id == id)
    }

    /// First band containing `score`, in band `order`.
    pub fn grade_band_for(&self, score: Points) -> Option<&GradeBand> {
        let mut bands: Vec<&GradeBand> = self.grade_bands.iter().collect();
        bands.sort_by_key(|band| (band.order, band.min_score));
        bands
            .into_iter()
            .find(|band| band.min_score <= score && score <= band.max_score)
    }

    pub fn remark_band_for(&self, percentage: Points) -> Option<&RemarkBand> {
        let mut bands: Vec<&RemarkBand> = self.remark_bands.iter().collect();
        bands.sort_by_key(|band| band.min_percentage);
        bands
            .into_iter()
            .find(|band| band.min_percentage <= percentage && percentage <= band.max_percentage)
    }
}

/// Named, weighted portion of a template's total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentComponent {
    pub id: ComponentId,
    pub name: String,
    pub weight: Points,
    pub is_required: bool,
    pub display_order: u16,
}

/// Score range (inclusive on both ends) mapped to a letter grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeBand {
    pub label: String,
    pub min_score: Points,
    pub max_score: Points,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub order: u16,
}

/// Percentage range mapped to commentary. Supports `{grade}`, `{percentage}` and
/// `{subject}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkBand {
    pub min_percentage: Points,
    pub max_percentage: Points,
    pub remark: String,
}

impl RemarkBand {
    pub fn render(&self, grade: &str, percentage: Points, subject: &str) -> String {
        fill_placeholders(&self.remark, grade, percentage, subject)
    }
}

pub(crate) fn fill_placeholders(
    text: &str,
    grade: &str,
    percentage: Points,
    subject: &str,
) -> String {
    text.replace("{grade}", grade)
        .replace("{percentage}", &percentage.to_string())
        .replace("{subject}", subject)
}

/// Inbound template configuration, saved atomically with all of its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    #[serde(default = "default_total_marks")]
    pub total_marks: Points,
    #[serde(default)]
    pub is_default: bool,
    pub components: Vec<ComponentDraft>,
    pub grade_bands: Vec<GradeBand>,
    #[serde(default)]
    pub remark_bands: Vec<RemarkBand>,
}

fn default_total_marks() -> Points {
    Points::HUNDRED
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDraft {
    pub name: String,
    pub weight: Points,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub display_order: Option<u16>,
}
