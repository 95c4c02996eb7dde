//! Exhaustive and property-based verification of the task status state
//! machine: forward-only transitions, immutable terminal states, and the
//! queued-may-skip-started shortcut.

use proptest::prelude::*;

use taskmesh::types::task::{TaskResult, TaskStatus};

const ALL: [TaskStatus; 6] = [
    TaskStatus::Parked,
    TaskStatus::Queued,
    TaskStatus::Started,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Aborted,
];

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(ALL.to_vec())
}

// ─── Exhaustive Transition Matrix ───────────────────────────────────────────

mod matrix {
    use super::*;

    fn allowed(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Parked, Queued)
                | (Parked, Aborted)
                | (Queued, Started)
                | (Queued, Completed)
                | (Queued, Failed)
                | (Queued, Aborted)
                | (Started, Completed)
                | (Started, Failed)
                | (Started, Aborted)
        )
    }

    #[test]
    fn full_matrix_matches_expected_edges() {
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed(from, to),
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn exactly_nine_edges_exist() {
        let mut count = 0;
        for from in ALL {
            for to in ALL {
                if from.can_transition_to(to) {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 9);
    }

    #[test]
    fn validate_transition_agrees_with_predicate() {
        for from in ALL {
            for to in ALL {
                let validated = from.validate_transition("t-1", to).is_ok();
                assert_eq!(validated, from.can_transition_to(to));
            }
        }
    }
}

// ─── Property Tests ─────────────────────────────────────────────────────────

/// Rank of a status along the forward path. Terminal states share the top
/// rank.
fn rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Parked => 0,
        TaskStatus::Queued => 1,
        TaskStatus::Started => 2,
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted => 3,
    }
}

proptest! {
    /// Every permitted transition moves strictly forward.
    #[test]
    fn transitions_are_forward_only(from in arb_status(), to in arb_status()) {
        if from.can_transition_to(to) {
            prop_assert!(rank(to) > rank(from));
        }
    }

    /// Terminal states reject every transition.
    #[test]
    fn terminal_states_are_immutable(
        from in prop::sample::select(vec![
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Aborted,
        ]),
        to in arb_status(),
    ) {
        prop_assert!(!from.can_transition_to(to));
    }

    /// Self-transitions are always rejected.
    #[test]
    fn self_transitions_rejected(status in arb_status()) {
        prop_assert!(!status.can_transition_to(status));
    }

    /// Every non-terminal status has a path to Aborted (cancellation is
    /// always possible before a terminal result).
    #[test]
    fn cancellation_reaches_every_live_status(status in arb_status()) {
        if !status.is_terminal() {
            prop_assert!(status.can_transition_to(TaskStatus::Aborted));
        }
    }

    /// Status serde never panics and round-trips.
    #[test]
    fn status_serde_round_trip(status in arb_status()) {
        let json = serde_json::to_value(status).unwrap();
        let back: TaskStatus = serde_json::from_value(json).unwrap();
        prop_assert_eq!(status, back);
    }
}

// ─── Result-to-Status Mapping ───────────────────────────────────────────────

#[test]
fn every_result_maps_to_a_terminal_status() {
    for result in [
        TaskResult::success(serde_json::json!({})),
        TaskResult::failure("boom"),
        TaskResult::aborted(),
    ] {
        assert!(result.terminal_status().is_terminal());
    }
}

#[test]
fn queued_and_started_accept_every_result_status() {
    for result in [
        TaskResult::success(serde_json::json!({})),
        TaskResult::failure("boom"),
        TaskResult::aborted(),
    ] {
        assert!(TaskStatus::Queued.can_transition_to(result.terminal_status()));
        assert!(TaskStatus::Started.can_transition_to(result.terminal_status()));
    }
}
