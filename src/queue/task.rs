use crate::workflow::ReviewDecision;

/// Commands processed, one at a time, for a single run.
#[derive(Debug, Clone)]
pub enum Task {
    /// Drive a freshly registered run from its requirements.
    Start,
    /// Apply a human decision to the stage awaiting review, then keep going.
    Review { decision: ReviewDecision },
    /// Continue from the latest checkpoint, or from a given sequence number.
    Resume { from: Option<u64> },
}

impl Task {
    pub fn description(&self, run_id: &str) -> String {
        match self {
            Task::Start => format!("Start run {run_id}"),
            Task::Review { decision } => format!(
                "Apply {:?} review of {} to run {run_id}",
                decision.outcome, decision.stage
            ),
            Task::Resume { from: Some(sequence) } => {
                format!("Resume run {run_id} from checkpoint {sequence}")
            }
            Task::Resume { from: None } => format!("Resume run {run_id}"),
        }
    }
}
