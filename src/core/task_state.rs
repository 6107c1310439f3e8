use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse task status exposed to external contracts and list filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Authoritative lifecycle state of a task
///
/// `TaskStatus` is a lossy projection of this value: both waiting states
/// project to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailedStatus {
    /// Created, never executed
    Pending,
    /// A coordinator loop is driving the task
    Running,
    /// Parked on an unanswered question
    WaitingInput,
    /// Parked on a tool approval request
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

/// Events that move a task along its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Execute,
    AskQuestion,
    RequestApproval,
    Respond,
    Approve,
    Reject,
    Succeed,
    Fail,
    Cancel,
}

impl DetailedStatus {
    pub const ALL: [DetailedStatus; 7] = [
        DetailedStatus::Pending,
        DetailedStatus::Running,
        DetailedStatus::WaitingInput,
        DetailedStatus::WaitingApproval,
        DetailedStatus::Completed,
        DetailedStatus::Failed,
        DetailedStatus::Cancelled,
    ];

    /// Computes the state reached by applying `event`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` for any edge outside the lifecycle table.
    pub fn apply(self, event: LifecycleEvent) -> Result<DetailedStatus, Error> {
        use DetailedStatus::*;
        use LifecycleEvent::*;

        let next = match (self, event) {
            (Pending, Execute) | (Failed, Execute) => Running,
            (Running, AskQuestion) => WaitingInput,
            (Running, RequestApproval) => WaitingApproval,
            (WaitingInput, Respond) => Running,
            (WaitingApproval, Approve) | (WaitingApproval, Reject) => Running,
            (Running, Succeed) => Completed,
            (Running, LifecycleEvent::Fail) => DetailedStatus::Failed,
            (Running, Cancel) | (WaitingInput, Cancel) | (WaitingApproval, Cancel) => Cancelled,
            (from, event) => return Err(Error::invalid_transition(from, event)),
        };
        Ok(next)
    }

    /// Projects the detailed state onto the coarse status
    pub fn project(self) -> TaskStatus {
        match self {
            DetailedStatus::Pending => TaskStatus::Pending,
            DetailedStatus::Running
            | DetailedStatus::WaitingInput
            | DetailedStatus::WaitingApproval => TaskStatus::Running,
            DetailedStatus::Completed => TaskStatus::Completed,
            DetailedStatus::Failed => TaskStatus::Failed,
            DetailedStatus::Cancelled => TaskStatus::Cancelled,
        }
    }

    /// Running or parked at a suspension point
    pub fn is_active(self) -> bool {
        self.project() == TaskStatus::Running
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            DetailedStatus::WaitingInput | DetailedStatus::WaitingApproval
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DetailedStatus::Completed | DetailedStatus::Failed | DetailedStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailedStatus::Pending => "pending",
            DetailedStatus::Running => "running",
            DetailedStatus::WaitingInput => "waiting_input",
            DetailedStatus::WaitingApproval => "waiting_approval",
            DetailedStatus::Completed => "completed",
            DetailedStatus::Failed => "failed",
            DetailedStatus::Cancelled => "cancelled",
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DetailedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Execute => "execute",
            LifecycleEvent::AskQuestion => "ask_question",
            LifecycleEvent::RequestApproval => "request_approval",
            LifecycleEvent::Respond => "respond",
            LifecycleEvent::Approve => "approve",
            LifecycleEvent::Reject => "reject",
            LifecycleEvent::Succeed => "succeed",
            LifecycleEvent::Fail => "fail",
            LifecycleEvent::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

impl FromStr for DetailedStatus {
    type Err = String;

    /// Parses the snake_case name stored in the repository
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetailedStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown detailed status '{}'", s))
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("unknown task status '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: [LifecycleEvent; 9] = [
        LifecycleEvent::Execute,
        LifecycleEvent::AskQuestion,
        LifecycleEvent::RequestApproval,
        LifecycleEvent::Respond,
        LifecycleEvent::Approve,
        LifecycleEvent::Reject,
        LifecycleEvent::Succeed,
        LifecycleEvent::Fail,
        LifecycleEvent::Cancel,
    ];

    fn legal_edges() -> Vec<(DetailedStatus, LifecycleEvent, DetailedStatus)> {
        use DetailedStatus::*;
        vec![
            (Pending, LifecycleEvent::Execute, Running),
            (Failed, LifecycleEvent::Execute, Running),
            (Running, LifecycleEvent::AskQuestion, WaitingInput),
            (Running, LifecycleEvent::RequestApproval, WaitingApproval),
            (WaitingInput, LifecycleEvent::Respond, Running),
            (WaitingApproval, LifecycleEvent::Approve, Running),
            (WaitingApproval, LifecycleEvent::Reject, Running),
            (Running, LifecycleEvent::Succeed, Completed),
            (Running, LifecycleEvent::Fail, Failed),
            (Running, LifecycleEvent::Cancel, Cancelled),
            (WaitingInput, LifecycleEvent::Cancel, Cancelled),
            (WaitingApproval, LifecycleEvent::Cancel, Cancelled),
        ]
    }

    #[test]
    fn test_every_edge_outside_the_table_is_rejected() {
        let edges = legal_edges();
        for from in DetailedStatus::ALL {
            for event in EVENTS {
                let expected = edges
                    .iter()
                    .find(|(f, e, _)| *f == from && *e == event)
                    .map(|(_, _, to)| *to);
                match (from.apply(event), expected) {
                    (Ok(next), Some(to)) => assert_eq!(next, to, "{} --{}-->", from, event),
                    (Err(Error::InvalidTransition { .. }), None) => {}
                    (other, expected) => panic!(
                        "{} --{}--> gave {:?}, expected {:?}",
                        from, event, other, expected
                    ),
                }
            }
        }
    }

    #[test]
    fn test_waiting_states_project_to_running() {
        assert_eq!(DetailedStatus::WaitingInput.project(), TaskStatus::Running);
        assert_eq!(DetailedStatus::WaitingApproval.project(), TaskStatus::Running);
        assert_eq!(DetailedStatus::Cancelled.project(), TaskStatus::Cancelled);
        assert!(DetailedStatus::WaitingApproval.is_active());
        assert!(!DetailedStatus::Pending.is_active());
    }

    #[test]
    fn test_status_names_parse_back() {
        for status in DetailedStatus::ALL {
            assert_eq!(status.as_str().parse::<DetailedStatus>(), Ok(status));
        }
        assert!("In Progress".parse::<DetailedStatus>().is_err());
    }
}
