use autopilot_core::TaskStatus;

use crate::error::{OrchestratorError, Result};

pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn validate_transition(from: &TaskStatus, to: &TaskStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition(from, to))
        }
    }

    /// Forward edge, the two retry edges back into `Implementing`, and
    /// `Blocked` from any state the agent is working on.
    fn allowed_transitions(from: &TaskStatus) -> Vec<TaskStatus> {
        match from {
            TaskStatus::Pending => vec![TaskStatus::Drafting],
            TaskStatus::Drafting => vec![TaskStatus::Implementing, TaskStatus::Blocked],
            TaskStatus::Implementing => vec![TaskStatus::SelfReview, TaskStatus::Blocked],
            TaskStatus::SelfReview => vec![
                TaskStatus::Testing,
                TaskStatus::Implementing,
                TaskStatus::Blocked,
            ],
            TaskStatus::Testing => vec![TaskStatus::AwaitingTestStatus, TaskStatus::Blocked],
            TaskStatus::AwaitingTestStatus => vec![
                TaskStatus::AwaitingHumanMerge,
                TaskStatus::Implementing,
                TaskStatus::Blocked,
            ],
            TaskStatus::AwaitingHumanMerge => vec![TaskStatus::Completed, TaskStatus::Blocked],
            TaskStatus::Completed => vec![],
            TaskStatus::Blocked => vec![],
        }
    }

    pub fn can_transition(from: &TaskStatus, to: &TaskStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    pub fn next_status(current: &TaskStatus) -> Option<TaskStatus> {
        let ordinal = current.ordinal()?;
        TaskStatus::LIFECYCLE.get(ordinal + 1).copied()
    }

    pub fn is_retry_edge(from: &TaskStatus, to: &TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::SelfReview, TaskStatus::Implementing)
                | (TaskStatus::AwaitingTestStatus, TaskStatus::Implementing)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain_is_allowed() {
        for pair in TaskStatus::LIFECYCLE.windows(2) {
            assert!(
                TaskStateMachine::can_transition(&pair[0], &pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
            assert_eq!(TaskStateMachine::next_status(&pair[0]), Some(pair[1]));
        }
        assert_eq!(TaskStateMachine::next_status(&TaskStatus::Completed), None);
        assert_eq!(TaskStateMachine::next_status(&TaskStatus::Blocked), None);
    }

    #[test]
    fn test_no_skips() {
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Pending,
            &TaskStatus::Implementing
        ));
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Testing,
            &TaskStatus::AwaitingHumanMerge
        ));
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Implementing,
            &TaskStatus::Testing
        ));
    }

    #[test]
    fn test_only_two_back_edges() {
        let mut back_edges = Vec::new();
        for from in TaskStatus::LIFECYCLE {
            for to in TaskStatus::LIFECYCLE {
                let backwards = to.ordinal() < from.ordinal();
                if backwards && TaskStateMachine::can_transition(&from, &to) {
                    back_edges.push((from, to));
                }
            }
        }

        assert_eq!(
            back_edges,
            vec![
                (TaskStatus::SelfReview, TaskStatus::Implementing),
                (TaskStatus::AwaitingTestStatus, TaskStatus::Implementing),
            ]
        );
        for (from, to) in back_edges {
            assert!(TaskStateMachine::is_retry_edge(&from, &to));
        }
    }

    #[test]
    fn test_blocked_reachability() {
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Pending,
            &TaskStatus::Blocked
        ));
        assert!(TaskStateMachine::can_transition(
            &TaskStatus::AwaitingHumanMerge,
            &TaskStatus::Blocked
        ));
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Completed,
            &TaskStatus::Blocked
        ));
        assert!(!TaskStateMachine::can_transition(
            &TaskStatus::Blocked,
            &TaskStatus::Pending
        ));
    }

    #[test]
    fn test_invalid_transition_error_names_states() {
        let err = TaskStateMachine::validate_transition(&TaskStatus::Completed, &TaskStatus::Pending)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from completed to pending"
        );
    }
}
