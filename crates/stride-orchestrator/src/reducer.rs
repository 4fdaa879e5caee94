use stride_types::{DestinationOutcome, OutcomeStatus, RunStatus};

/// Derive the overall run status from the per-destination outcome set.
///
/// Stateless and pure: runs with identical outcome multisets always reduce
/// to the same status. A pipeline with no destinations reduces straight to
/// `Synced`.
pub fn reduce_status(outcomes: &[DestinationOutcome]) -> RunStatus {
    if outcomes
        .iter()
        .any(|o| o.status == OutcomeStatus::Pending)
    {
        return RunStatus::Running;
    }
    let any_ok = outcomes
        .iter()
        .any(|o| matches!(o.status, OutcomeStatus::Success | OutcomeStatus::Skipped));
    let any_failed = outcomes.iter().any(|o| o.status == OutcomeStatus::Failed);

    match (any_failed, any_ok) {
        (false, _) => RunStatus::Synced,
        (true, true) => RunStatus::Partial,
        (true, false) => RunStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_types::Destination;

    fn outcome(destination: Destination, status: OutcomeStatus) -> DestinationOutcome {
        DestinationOutcome {
            destination,
            status,
            external_id: None,
            error: None,
            completed_at: None,
        }
    }

    #[test]
    fn any_pending_keeps_the_run_running() {
        let outcomes = vec![
            outcome(Destination::Strava, OutcomeStatus::Success),
            outcome(Destination::Hevy, OutcomeStatus::Pending),
        ];
        assert_eq!(reduce_status(&outcomes), RunStatus::Running);
    }

    #[test]
    fn all_success_or_skipped_is_synced() {
        let outcomes = vec![
            outcome(Destination::Strava, OutcomeStatus::Success),
            outcome(Destination::Hevy, OutcomeStatus::Skipped),
        ];
        assert_eq!(reduce_status(&outcomes), RunStatus::Synced);
    }

    #[test]
    fn mixed_failure_is_partial() {
        let outcomes = vec![
            outcome(Destination::Strava, OutcomeStatus::Success),
            outcome(Destination::Hevy, OutcomeStatus::Failed),
        ];
        assert_eq!(reduce_status(&outcomes), RunStatus::Partial);
    }

    #[test]
    fn all_failed_is_failed() {
        let outcomes = vec![
            outcome(Destination::Strava, OutcomeStatus::Failed),
            outcome(Destination::Hevy, OutcomeStatus::Failed),
        ];
        assert_eq!(reduce_status(&outcomes), RunStatus::Failed);
    }

    #[test]
    fn zero_destinations_reduce_to_synced() {
        assert_eq!(reduce_status(&[]), RunStatus::Synced);
    }

    #[test]
    fn reduction_ignores_outcome_order() {
        let a = vec![
            outcome(Destination::Strava, OutcomeStatus::Failed),
            outcome(Destination::Hevy, OutcomeStatus::Success),
        ];
        let b = vec![
            outcome(Destination::Hevy, OutcomeStatus::Success),
            outcome(Destination::Strava, OutcomeStatus::Failed),
        ];
        assert_eq!(reduce_status(&a), reduce_status(&b));
    }
}
