use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::super::domain::{ClassId, SchoolClass};

/// Where a class moves at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "class_id", rename_all = "snake_case")]
pub enum ProgressionStep {
    Next(ClassId),
    Graduate,
}

/// Class -> next class, derived from the tenant's level hierarchy.
///
/// A class advances to the next higher level, preferring the class with the same arm and
/// otherwise the first class at that level by name. Classes at the highest level graduate.
#[derive(Debug, Clone, Default)]
pub struct ClassProgressionMap {
    steps: HashMap<ClassId, ProgressionStep>,
}

impl ClassProgressionMap {
    pub fn from_classes(classes: &[SchoolClass]) -> Self {
        let mut by_level: BTreeMap<u16, Vec<&SchoolClass>> = BTreeMap::new();
        for class in classes {
            by_level.entry(class.level).or_default().push(class);
        }
        for level in by_level.values_mut() {
            level.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        }

        let mut steps = HashMap::with_capacity(classes.len());
        for class in classes {
            let next_level = by_level
                .range(class.level.saturating_add(1)..)
                .next()
                .map(|(_, members)| members);

            let step = match next_level {
                None => ProgressionStep::Graduate,
                Some(members) => {
                    let same_arm = members
                        .iter()
                        .find(|candidate| class.arm.is_some() && candidate.arm == class.arm);
                    let target = same_arm.or_else(|| members.first());
                    match target {
                        Some(target) => ProgressionStep::Next(target.id.clone()),
                        None => ProgressionStep::Graduate,
                    }
                }
            };
            steps.insert(class.id.clone(), step);
        }

        Self { steps }
    }

    /// `None` for a class the map does not know.
    pub fn step_for(&self, class: &ClassId) -> Option<&ProgressionStep> {
        self.steps.get(class)
    }

    pub fn is_terminal(&self, class: &ClassId) -> bool {
        matches!(self.step_for(class), Some(ProgressionStep::Graduate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academics::domain::TenantId;

    fn class(id: &str, level: u16, arm: Option<&str>) -> SchoolClass {
        SchoolClass {
            id: ClassId::from(id),
            tenant: TenantId::from("school"),
            name: id.to_uppercase(),
            level,
            arm: arm.map(str::to_string),
        }
    }

    #[test]
    fn advances_within_arm_and_graduates_top_level() {
        let map = ClassProgressionMap::from_classes(&[
            class("jss1a", 1, Some("A")),
            class("jss1b", 1, Some("B")),
            class("jss2a", 2, Some("A")),
            class("jss2b", 2, Some("B")),
            class("jss3", 3, None),
        ]);

        assert_eq!(
            map.step_for(&ClassId::from("jss1b")),
            Some(&ProgressionStep::Next(ClassId::from("jss2b")))
        );
        assert_eq!(
            map.step_for(&ClassId::from("jss2a")),
            Some(&ProgressionStep::Next(ClassId::from("jss3")))
        );
        assert!(map.is_terminal(&ClassId::from("jss3")));
        assert_eq!(map.step_for(&ClassId::from("unknown")), None);
    }

    #[test]
    fn skips_missing_levels() {
        let map = ClassProgressionMap::from_classes(&[class("p1", 1, None), class("p4", 4, None)]);
        assert_eq!(
            map.step_for(&ClassId::from("p1")),
            Some(&ProgressionStep::Next(ClassId::from("p4")))
        );
    }
}
