pub mod controller;
pub mod gate;
pub mod stage;
pub mod state;
pub mod types;

pub use controller::{Step, WorkflowController};
pub use gate::{GateVerdict, PolicyAssessment, ReviewGate};
pub use stage::Stage;
pub use state::{Artifact, ReviewDecision, ReviewStatus, WorkflowState};
pub use types::{RunOutcome, StepStatus};
