use std::collections::HashSet;

use super::super::domain::Points;
use super::super::errors::{BandKind, ConfigurationError};
use super::super::normalizer::name_key;
use super::TemplateDraft;

/// Check every configuration invariant of a template before it is persisted.
pub fn validate_draft(draft: &TemplateDraft) -> Result<(), ConfigurationError> {
    if draft.total_marks <= Points::ZERO {
        return Err(ConfigurationError::NonPositiveTotal {
            total: draft.total_marks,
        });
    }

    validate_components(draft)?;

    let grade_ranges = draft
        .grade_bands
        .iter()
        .map(|band| BandRange {
            label: band.label.trim().to_string(),
            min: band.min_score,
            max: band.max_score,
        })
        .collect();
    check_partition(BandKind::Grade, grade_ranges, draft.total_marks)?;

    // Remark bands are optional; when absent the grade band's remark text is used.
    if !draft.remark_bands.is_empty() {
        let remark_ranges = draft
            .remark_bands
            .iter()
            .map(|band| BandRange {
                label: format!("{}-{}", band.min_percentage, band.max_percentage),
                min: band.min_percentage,
                max: band.max_percentage,
            })
            .collect();
        check_partition(BandKind::Remark, remark_ranges, Points::HUNDRED)?;
    }

    Ok(())
}

fn validate_components(draft: &TemplateDraft) -> Result<(), ConfigurationError> {
    if draft.components.is_empty() {
        return Err(ConfigurationError::NoComponents);
    }

    let mut seen = HashSet::new();
    for component in &draft.components {
        if component.weight <= Points::ZERO {
            return Err(ConfigurationError::NonPositiveWeight {
                component: component.name.clone(),
                weight: component.weight,
            });
        }
        if !seen.insert(name_key(&component.name)) {
            return Err(ConfigurationError::DuplicateComponent {
                component: component.name.clone(),
            });
        }
    }

    let actual: Points = draft.components.iter().map(|c| c.weight).sum();
    if actual != draft.total_marks {
        return Err(ConfigurationError::WeightSumMismatch {
            expected: draft.total_marks,
            actual,
        });
    }

    Ok(())
}

struct BandRange {
    label: String,
    min: Points,
    max: Points,
}

/// Bands sorted by min must tile `[0, upper]` exactly, each starting one step after the
/// previous band's inclusive max.
fn check_partition(
    kind: BandKind,
    mut ranges: Vec<BandRange>,
    upper: Points,
) -> Result<(), ConfigurationError> {
    if ranges.is_empty() {
        return Err(ConfigurationError::NoBands { kind });
    }

    for range in &ranges {
        if kind == BandKind::Grade && range.label.is_empty() {
            return Err(ConfigurationError::BlankBandLabel { kind });
        }
        if range.min > range.max {
            return Err(ConfigurationError::InvertedBand {
                kind,
                label: range.label.clone(),
                min: range.min,
                max: range.max,
            });
        }
    }

    ranges.sort_by_key(|range| (range.min, range.max));

    let first = &ranges[0];
    if first.min != Points::ZERO {
        return Err(ConfigurationError::UncoveredStart {
            kind,
            expected: Points::ZERO,
            found: first.min,
        });
    }

    for pair in ranges.windows(2) {
        let (previous, next) = (&pair[0], &pair[1]);
        let expected = previous.max + Points::STEP;
        if next.min > expected {
            return Err(ConfigurationError::BandGap {
                kind,
                after: previous.label.clone(),
                expected,
                found: next.min,
            });
        }
        if next.min < expected {
            return Err(ConfigurationError::BandOverlap {
                kind,
                after: previous.label.clone(),
                expected,
                found: next.min,
            });
        }
    }

    let last = &ranges[ranges.len() - 1];
    if last.max != upper {
        return Err(ConfigurationError::UncoveredEnd {
            kind,
            expected: upper,
            found: last.max,
        });
    }

    Ok(())
}
