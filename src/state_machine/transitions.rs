use super::states::Status;

impl Status {
    /// Check whether a transition from this status to `to` is legal.
    ///
    /// The table mirrors the attempt lifecycle: gates and pre-flight settle a
    /// `NotStarted` attempt, the runner settles a `Running` one, and
    /// `AwaitingRetry` bridges to the next `Running` (or to `Stopped` when the
    /// stop signal fires during the retry delay). Terminal statuses and
    /// `Retry` (a settled attempt whose successor exists) have no outgoing
    /// transitions; stores use this to keep finalized attempts immutable.
    pub fn can_transition_to(&self, to: Status) -> bool {
        match self {
            Self::NotStarted => matches!(
                to,
                Status::Running
                    | Status::Stopped
                    | Status::Skipped
                    | Status::Failed
                    | Status::Duplicate
            ),
            Self::Running => matches!(
                to,
                Status::Succeeded
                    | Status::Warning
                    | Status::Failed
                    | Status::Stopped
                    | Status::Retry
            ),
            Self::AwaitingRetry => {
                matches!(to, Status::Running | Status::Stopped | Status::Failed)
            }
            Self::Retry
            | Self::Succeeded
            | Self::Warning
            | Self::Failed
            | Self::Stopped
            | Self::Skipped
            | Self::Duplicate => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 10] = [
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

    #[test]
    fn terminal_statuses_never_transition() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn retry_is_frozen_once_successor_exists() {
        for to in ALL {
            assert!(!Status::Retry.can_transition_to(to));
        }
    }

    #[test]
    fn lifecycle_happy_paths() {
        assert!(Status::NotStarted.can_transition_to(Status::Running));
        assert!(Status::Running.can_transition_to(Status::Succeeded));
        assert!(Status::Running.can_transition_to(Status::Warning));
        assert!(Status::Running.can_transition_to(Status::Retry));
        assert!(Status::AwaitingRetry.can_transition_to(Status::Running));
        assert!(Status::AwaitingRetry.can_transition_to(Status::Stopped));
    }

    #[test]
    fn gate_outcomes_settle_unstarted_attempts() {
        assert!(Status::NotStarted.can_transition_to(Status::Skipped));
        assert!(Status::NotStarted.can_transition_to(Status::Duplicate));
        assert!(Status::NotStarted.can_transition_to(Status::Stopped));
        assert!(Status::NotStarted.can_transition_to(Status::Failed));
        assert!(!Status::NotStarted.can_transition_to(Status::Succeeded));
        assert!(!Status::NotStarted.can_transition_to(Status::Retry));
    }
}
