//! Ingest-time validation of [`Plan`]s and [`Suite`] trees.
//!
//! `validate_plan` enforces the Step invariants from §3 (ordinal
//! contiguity, `type`/`select` requires `data`, `assert` requires
//! `expected`, `navigate` requires an absolute URL). `detect_cycle` is the
//! same depth-first visited/visiting walk the teacher's DAG validator uses,
//! applied here to the Suite parentId forest instead of a step dependency
//! graph.

use std::collections::{HashMap, HashSet};

use crate::protocol::{Plan, StepKind, Suite};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("step ordinals must be exactly 1..N without gaps, got {found:?}")]
    NonContiguousOrdinals { found: Vec<u32> },
    #[error("step {ordinal}: kind={kind:?} requires `data`")]
    MissingData { ordinal: u32, kind: StepKind },
    #[error("step {ordinal}: kind=assert requires `expected`")]
    MissingExpected { ordinal: u32 },
    #[error("step {ordinal}: kind=navigate requires an absolute URL target, got '{target}'")]
    NavigateTargetNotAbsolute { ordinal: u32, target: String },
    #[error("suite parent graph contains a cycle starting at '{0}'")]
    SuiteCycle(String),
    #[error("plan '{0}' is referenced by more than one suite's direct test list")]
    PlanOwnedByMultipleSuites(String),
}

pub fn validate_plan(plan: &Plan) -> Result<(), ValidationError> {
    let mut ordinals: Vec<u32> = plan.steps.iter().map(|s| s.ordinal).collect();
    ordinals.sort_unstable();
    let expected: Vec<u32> = (1..=plan.steps.len() as u32).collect();
    if ordinals != expected {
        return Err(ValidationError::NonContiguousOrdinals { found: ordinals });
    }

    for step in &plan.steps {
        match step.kind {
            StepKind::Type | StepKind::Select if step.data.is_none() => {
                return Err(ValidationError::MissingData { ordinal: step.ordinal, kind: step.kind });
            }
            StepKind::Assert if step.expected.is_none() => {
                return Err(ValidationError::MissingExpected { ordinal: step.ordinal });
            }
            StepKind::Navigate if !is_absolute_url(&step.target) => {
                return Err(ValidationError::NavigateTargetNotAbsolute {
                    ordinal: step.ordinal,
                    target: step.target.clone(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

fn is_absolute_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Verifies the forest invariant (no cycles in `parentId`) and that no Plan
/// id is claimed by more than one suite's direct list.
pub fn validate_suite_forest(suites: &[Suite]) -> Result<(), ValidationError> {
    let by_id: HashMap<&str, &Suite> = suites.iter().map(|s| (s.id.as_str(), s)).collect();

    for suite in suites {
        let mut visiting = HashSet::new();
        let mut current = suite;
        loop {
            if !visiting.insert(current.id.as_str()) {
                return Err(ValidationError::SuiteCycle(suite.id.clone()));
            }
            match current.parent_id.as_deref().and_then(|p| by_id.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    let mut owners: HashMap<&str, &str> = HashMap::new();
    for suite in suites {
        for plan_id in &suite.plan_ids {
            if let Some(existing) = owners.insert(plan_id.as_str(), suite.id.as_str()) {
                if existing != suite.id.as_str() {
                    return Err(ValidationError::PlanOwnedByMultipleSuites(plan_id.clone()));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlanOptions, Step};
    use std::collections::HashSet as StdHashSet;

    fn plan_with(steps: Vec<Step>) -> Plan {
        Plan {
            id: "p1".into(),
            name: "plan".into(),
            description: None,
            tags: StdHashSet::new(),
            steps,
            options: PlanOptions::default(),
        }
    }

    #[test]
    fn rejects_gaps_in_ordinals() {
        let plan = plan_with(vec![Step {
            ordinal: 2,
            kind: StepKind::Navigate,
            target: "https://example.com".into(),
            data: None,
            expected: None,
            description: "".into(),
        }]);
        assert!(matches!(validate_plan(&plan), Err(ValidationError::NonContiguousOrdinals { .. })));
    }

    #[test]
    fn rejects_type_without_data() {
        let plan = plan_with(vec![Step {
            ordinal: 1,
            kind: StepKind::Type,
            target: "css:#field".into(),
            data: None,
            expected: None,
            description: "".into(),
        }]);
        assert!(matches!(validate_plan(&plan), Err(ValidationError::MissingData { .. })));
    }

    #[test]
    fn rejects_relative_navigate_target() {
        let plan = plan_with(vec![Step {
            ordinal: 1,
            kind: StepKind::Navigate,
            target: "/relative/path".into(),
            data: None,
            expected: None,
            description: "".into(),
        }]);
        assert!(matches!(validate_plan(&plan), Err(ValidationError::NavigateTargetNotAbsolute { .. })));
    }

    fn suite(id: &str, parent: Option<&str>, plan_ids: Vec<&str>) -> Suite {
        Suite {
            id: id.into(),
            name: id.into(),
            parent_id: parent.map(|p| p.to_string()),
            description: None,
            tags: StdHashSet::new(),
            plan_ids: plan_ids.into_iter().map(|s| s.to_string()).collect(),
            schedule: None,
            stats: Default::default(),
        }
    }

    #[test]
    fn detects_suite_cycle() {
        let suites = vec![suite("a", Some("b"), vec![]), suite("b", Some("a"), vec![])];
        assert!(matches!(validate_suite_forest(&suites), Err(ValidationError::SuiteCycle(_))));
    }

    #[test]
    fn rejects_plan_owned_by_two_suites() {
        let suites = vec![suite("a", None, vec!["p1"]), suite("b", None, vec!["p1"])];
        assert!(matches!(
            validate_suite_forest(&suites),
            Err(ValidationError::PlanOwnedByMultipleSuites(_))
        ));
    }

    #[test]
    fn accepts_well_formed_forest() {
        let suites = vec![suite("root", None, vec!["p1"]), suite("child", Some("root"), vec!["p2"])];
        assert!(validate_suite_forest(&suites).is_ok());
    }
}
