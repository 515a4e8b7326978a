//! Property checks over the attempt status set and output truncation.

use proptest::prelude::*;
use serde_json::json;
use stepline_core::constants::TRUNCATION_MARKER;
use stepline_core::runners::truncate_output;
use stepline_core::state_machine::Status;

const ALL_STATUSES: [Status; 10] = [
    Status::NotStarted,
    Status::Running,
    Status::AwaitingRetry,
    Status::Retry,
    Status::Succeeded,
    Status::Warning,
    Status::Failed,
    Status::Stopped,
    Status::Skipped,
    Status::Duplicate,
];

fn any_status() -> impl Strategy<Value = Status> {
    proptest::sample::select(ALL_STATUSES.as_slice())
}

proptest! {
    /// A settled attempt admits no outgoing transition of any kind.
    #[test]
    fn settled_statuses_are_frozen(from in any_status(), to in any_status()) {
        if from.is_settled() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    /// Any legal transition starts from a live status.
    #[test]
    fn transitions_originate_from_live_statuses(from in any_status(), to in any_status()) {
        if from.can_transition_to(to) {
            prop_assert!(!from.is_settled());
        }
    }

    /// The predicates partition consistently: success and active statuses
    /// never overlap, and success implies terminal.
    #[test]
    fn predicates_are_consistent(status in any_status()) {
        if status.is_success() {
            prop_assert!(status.is_terminal());
        }
        if status.is_active() {
            prop_assert!(!status.is_terminal());
            prop_assert!(!status.is_success());
        }
        if status.is_terminal() {
            prop_assert!(status.is_settled());
        }
    }

    /// Every status survives a display/parse round trip.
    #[test]
    fn status_strings_round_trip(status in any_status()) {
        let parsed: Status = status.to_string().parse().unwrap();
        prop_assert_eq!(parsed, status);
    }

    /// Truncated output never exceeds the cap and stays valid UTF-8 with the
    /// marker up front.
    #[test]
    fn truncation_bounds_any_string(text in ".{0,512}", cap in 24usize..256) {
        let result = truncate_output(json!(text.clone()), cap);
        let rendered = result.as_str().unwrap();
        if text.len() <= cap {
            prop_assert_eq!(rendered, text.as_str());
        } else {
            prop_assert!(rendered.starts_with(TRUNCATION_MARKER));
            prop_assert!(rendered.len() <= cap);
        }
    }
}
