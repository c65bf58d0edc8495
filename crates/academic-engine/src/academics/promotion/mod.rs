//! End-of-session promotion: a non-mutating planner and an item-isolated executor.

mod executor;
mod planner;
mod progression;

pub use executor::{
    FailureKind, ItemFailure, ItemStatus, PromotionBatchResult, PromotionDecisionInput,
    PromotionExecutor, PromotionItemResult,
};
pub use planner::{
    PreviewCounts, PromotionCandidate, PromotionPlanner, PromotionPreview, SuggestedAction,
};
pub use progression::{ClassProgressionMap, ProgressionStep};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{ClassId, Points};
use super::errors::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionMode {
    Automatic,
    PerformanceBased,
    #[default]
    Manual,
}

impl PromotionMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::PerformanceBased => "performance_based",
            Self::Manual => "manual",
        }
    }
}

/// School-wide promotion policy. Tenants without settings are treated as manual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionSettings {
    pub mode: PromotionMode,
    #[serde(default)]
    pub minimum_average: Option<Points>,
    /// Per-class overrides of `minimum_average`.
    #[serde(default)]
    pub class_thresholds: BTreeMap<ClassId, Points>,
}

impl PromotionSettings {
    pub fn threshold_for(&self, class: &ClassId) -> Option<Points> {
        self.class_thresholds
            .get(class)
            .copied()
            .or(self.minimum_average)
    }

    /// Whether the average clears the bar. `None` when the mode has no bar.
    pub(crate) fn eligibility(
        &self,
        class: &ClassId,
        average: Option<Points>,
    ) -> Result<Option<bool>, ConfigurationError> {
        match self.mode {
            PromotionMode::Manual => Ok(None),
            PromotionMode::Automatic => Ok(Some(true)),
            PromotionMode::PerformanceBased => {
                let threshold = self
                    .threshold_for(class)
                    .ok_or_else(|| ConfigurationError::ThresholdMissing {
                        class: class.clone(),
                    })?;
                Ok(Some(average.is_some_and(|average| average >= threshold)))
            }
        }
    }
}
