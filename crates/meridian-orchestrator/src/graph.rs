//! Pure workflow-graph algorithms (`spec.md` §4.8.2-§4.8.4): entry points,
//! termination points, and the literal duplicate-target cycle criterion.
//! Deliberately NOT a true topological cycle detector — see
//! `meridian-orchestrator::service` module docs and `DESIGN.md` for why
//! this must not be "improved" into Tarjan's SCC.

use std::collections::{HashMap, HashSet};

use meridian_shared::model::Step;
use uuid::Uuid;

/// `R = ⋃ step.nextStepIds`; entry points are step ids absent from `R`.
pub fn entry_points(steps: &[Step]) -> Vec<Uuid> {
    let referenced: HashSet<Uuid> = steps.iter().flat_map(|s| s.next_step_ids.iter().copied()).collect();
    steps
        .iter()
        .map(|s| s.id)
        .filter(|id| !referenced.contains(id))
        .collect()
}

/// Steps with no successors.
pub fn termination_points(steps: &[Step]) -> Vec<Uuid> {
    steps
        .iter()
        .filter(|s| s.is_termination_point())
        .map(|s| s.id)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTarget {
    pub step_id: Uuid,
    pub occurrence_count: usize,
}

/// The literal rule of `spec.md` §4.8.4: aggregate every `nextStepIds`
/// reference WITHOUT deduplication, group by id, and report every id
/// appearing more than once — regardless of whether it turns out to be a
/// termination point. Callers decide pass/reject from this list; this
/// function never dedups ids in its own aggregation step so occurrence
/// counts stay faithful to the raw multiset the rule is defined over.
pub fn duplicate_next_step_targets(steps: &[Step]) -> Vec<DuplicateTarget> {
    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for step in steps {
        for next in &step.next_step_ids {
            *counts.entry(*next).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(step_id, occurrence_count)| DuplicateTarget {
            step_id,
            occurrence_count,
        })
        .collect()
}

/// Applies the pass/reject decision: every duplicated id must be in
/// `termination_points`, else this is rejected with the offending ids.
pub fn validate_no_circular_reference(
    steps: &[Step],
    termination_points: &[Uuid],
) -> Result<(), Vec<DuplicateTarget>> {
    let terminations: HashSet<Uuid> = termination_points.iter().copied().collect();
    let offending: Vec<DuplicateTarget> = duplicate_next_step_targets(steps)
        .into_iter()
        .filter(|d| !terminations.contains(&d.step_id))
        .collect();

    if offending.is_empty() {
        Ok(())
    } else {
        Err(offending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: Uuid, next: Vec<Uuid>) -> Step {
        Step {
            id,
            processor_id: Uuid::new_v4(),
            next_step_ids: next,
        }
    }

    // S1: single step, no successors.
    #[test]
    fn single_terminal_step_is_both_entry_and_termination() {
        let s1 = Uuid::new_v4();
        let steps = vec![step(s1, vec![])];
        assert_eq!(entry_points(&steps), vec![s1]);
        assert_eq!(termination_points(&steps), vec![s1]);
        assert!(validate_no_circular_reference(&steps, &termination_points(&steps)).is_ok());
    }

    // S2: S1 -> S2, S2 -> S1, no entry point.
    #[test]
    fn mutual_successors_have_no_entry_point() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let steps = vec![step(s1, vec![s2]), step(s2, vec![s1])];
        assert!(entry_points(&steps).is_empty());
    }

    // S3: S1->S2, S3->S2, S2->[]; S2 duplicated but terminal -> accepted.
    #[test]
    fn duplicated_termination_target_is_accepted() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let s3 = Uuid::new_v4();
        let steps = vec![step(s1, vec![s2]), step(s3, vec![s2]), step(s2, vec![])];
        let terms = termination_points(&steps);
        assert_eq!(terms, vec![s2]);
        assert!(validate_no_circular_reference(&steps, &terms).is_ok());
    }

    // S4: S1->S2, S3->S2, S2->S4, S4->[]; S2 duplicated and non-terminal -> rejected.
    #[test]
    fn duplicated_non_termination_target_is_rejected() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let s3 = Uuid::new_v4();
        let s4 = Uuid::new_v4();
        let steps = vec![
            step(s1, vec![s2]),
            step(s3, vec![s2]),
            step(s2, vec![s4]),
            step(s4, vec![]),
        ];
        let terms = termination_points(&steps);
        let result = validate_no_circular_reference(&steps, &terms);
        assert!(result.is_err());
        let offending = result.unwrap_err();
        assert_eq!(offending.len(), 1);
        assert_eq!(offending[0].step_id, s2);
        assert_eq!(offending[0].occurrence_count, 2);
    }

    #[test]
    fn no_steps_has_no_entry_or_termination_points() {
        assert!(entry_points(&[]).is_empty());
        assert!(termination_points(&[]).is_empty());
    }
}
