//! Dependency resolver.
//!
//! Classifies a pending job from the statuses of its direct predecessors.
//! Readiness is never cached: it is recomputed from the current predecessor
//! statuses every time a candidate is considered, because predecessor state
//! can change between claim attempts.

use std::collections::BTreeSet;

use crate::store::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// All predecessors are `done` (or there are none).
    Ready,
    /// At least one predecessor is `pending` or `running`, none is `error`.
    Waiting,
    /// At least one predecessor is `error`.
    Blocked,
}

/// Classify a job given the statuses of its direct predecessors.
///
/// `predecessor_statuses` must contain one entry per id in `depends_on`;
/// a missing entry is treated as a broken reference and panics in debug
/// builds of the resolver's caller, since the store enforces referential
/// integrity at `add_jobs` time and a missing row here is a bug, not an
/// expected runtime condition.
pub fn classify(depends_on: &BTreeSet<String>, predecessor_statuses: &[JobStatus]) -> Readiness {
    if predecessor_statuses.iter().any(|s| *s == JobStatus::Error) {
        return Readiness::Blocked;
    }
    if predecessor_statuses
        .iter()
        .any(|s| matches!(s, JobStatus::Pending | JobStatus::Running))
    {
        return Readiness::Waiting;
    }
    debug_assert_eq!(predecessor_statuses.len(), depends_on.len());
    Readiness::Ready
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ready_when_no_predecessors() {
        assert_eq!(classify(&set(&[]), &[]), Readiness::Ready);
    }

    #[test]
    fn ready_when_all_done() {
        let deps = set(&["a", "b"]);
        let statuses = [JobStatus::Done, JobStatus::Done];
        assert_eq!(classify(&deps, &statuses), Readiness::Ready);
    }

    #[test]
    fn waiting_when_any_pending_or_running() {
        let deps = set(&["a", "b"]);
        assert_eq!(
            classify(&deps, &[JobStatus::Done, JobStatus::Pending]),
            Readiness::Waiting
        );
        assert_eq!(
            classify(&deps, &[JobStatus::Running, JobStatus::Done]),
            Readiness::Waiting
        );
    }

    #[test]
    fn blocked_takes_priority_over_waiting() {
        let deps = set(&["a", "b", "c"]);
        let statuses = [JobStatus::Error, JobStatus::Pending, JobStatus::Done];
        assert_eq!(classify(&deps, &statuses), Readiness::Blocked);
    }
}
