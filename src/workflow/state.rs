use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::language::Language;
use crate::policy::AutonomyLevel;
use crate::workflow::stage::Stage;

/// Feedback recorded for a denial that arrived without a reason.
pub const NO_REASON_PROVIDED: &str = "no reason provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    NotStarted,
    /// Artifact generated and waiting for a decision.
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Human,
    Policy,
}

/// A single gate decision. Never modified after it is appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub stage: Stage,
    pub outcome: ReviewOutcome,
    pub feedback: String,
    pub decided_by: DecidedBy,
    pub timestamp: DateTime<Utc>,
}

impl ReviewDecision {
    pub fn approve(stage: Stage, decided_by: DecidedBy) -> Self {
        Self {
            stage,
            outcome: ReviewOutcome::Approved,
            feedback: String::new(),
            decided_by,
            timestamp: Utc::now(),
        }
    }

    /// A denial always carries a reason; blank feedback becomes [`NO_REASON_PROVIDED`].
    pub fn deny(stage: Stage, feedback: impl Into<String>, decided_by: DecidedBy) -> Self {
        let feedback = feedback.into();
        let feedback = if feedback.trim().is_empty() {
            NO_REASON_PROVIDED.to_string()
        } else {
            feedback.trim().to_string()
        };
        Self {
            stage,
            outcome: ReviewOutcome::Denied,
            feedback,
            decided_by,
            timestamp: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == ReviewOutcome::Approved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDocument {
    #[serde(default)]
    pub functional: Vec<String>,
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
}

impl DesignDocument {
    pub fn is_empty(&self) -> bool {
        self.functional.is_empty() && self.technical.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (title, items) in [
            ("Functional Requirements", &self.functional),
            ("Technical Requirements", &self.technical),
            ("Assumptions", &self.assumptions),
            ("Open Questions", &self.open_questions),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("## {title}\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// What the quality policy did at a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Approved,
    Denied,
    /// Score fell short but the autonomy level leaves the call to a human.
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousDecision {
    pub stage: Stage,
    pub verdict: PolicyVerdict,
    pub score: f64,
    pub threshold: f64,
    pub autonomy_level: AutonomyLevel,
    pub timestamp: DateTime<Utc>,
}

/// Output of one generator invocation, typed by stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    UserStories(Vec<String>),
    DesignDocument(DesignDocument),
    Code(BTreeMap<String, String>),
    SecurityReview(String),
    TestCases(String),
    Qa(String),
    Deployment(String),
}

impl Artifact {
    pub fn stage(&self) -> Stage {
        match self {
            Artifact::UserStories(_) => Stage::UserStories,
            Artifact::DesignDocument(_) => Stage::DesignDocument,
            Artifact::Code(_) => Stage::Code,
            Artifact::SecurityReview(_) => Stage::SecurityReview,
            Artifact::TestCases(_) => Stage::TestCases,
            Artifact::Qa(_) => Stage::Qa,
            Artifact::Deployment(_) => Stage::Deployment,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::UserStories(stories) => stories.iter().all(|s| s.trim().is_empty()),
            Artifact::DesignDocument(doc) => doc.is_empty(),
            Artifact::Code(files) => files.values().all(|c| c.trim().is_empty()),
            Artifact::SecurityReview(text)
            | Artifact::TestCases(text)
            | Artifact::Qa(text)
            | Artifact::Deployment(text) => text.trim().is_empty(),
        }
    }
}

/// The record threaded through a whole run.
///
/// Every mutation consumes the state and returns the next version, so each
/// checkpoint holds an untouched snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub requirements: String,
    pub programming_language: Language,
    pub llm_model: String,
    pub autonomy_level: AutonomyLevel,

    #[serde(default)]
    pub user_stories: Vec<String>,
    #[serde(default)]
    pub user_story_status: ReviewStatus,
    #[serde(default)]
    pub user_story_feedback: Vec<String>,

    #[serde(default)]
    pub design_document: DesignDocument,
    #[serde(default)]
    pub design_document_review_status: ReviewStatus,
    #[serde(default)]
    pub design_document_review_feedback: Vec<String>,

    #[serde(default)]
    pub code: BTreeMap<String, String>,
    #[serde(default)]
    pub code_review_status: ReviewStatus,
    #[serde(default)]
    pub code_review_feedback: Vec<String>,

    #[serde(default)]
    pub security_review: String,
    #[serde(default)]
    pub security_review_status: ReviewStatus,
    #[serde(default)]
    pub security_review_feedback: Vec<String>,

    #[serde(default)]
    pub test_cases: String,
    #[serde(default)]
    pub test_cases_review_status: ReviewStatus,
    #[serde(default)]
    pub test_cases_review_feedback: Vec<String>,

    #[serde(default)]
    pub qa_report: String,
    #[serde(default)]
    pub qa_review_status: ReviewStatus,
    #[serde(default)]
    pub qa_review_feedback: Vec<String>,

    #[serde(default)]
    pub deployment: String,

    #[serde(default)]
    pub quality_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub autonomous_decisions: Vec<AutonomousDecision>,
    #[serde(default)]
    pub decisions: Vec<ReviewDecision>,
}

impl WorkflowState {
    pub fn new(
        requirements: impl Into<String>,
        language: Language,
        llm_model: impl Into<String>,
        autonomy_level: AutonomyLevel,
    ) -> Self {
        Self {
            requirements: requirements.into(),
            programming_language: language,
            llm_model: llm_model.into(),
            autonomy_level,
            user_stories: Vec::new(),
            user_story_status: ReviewStatus::NotStarted,
            user_story_feedback: Vec::new(),
            design_document: DesignDocument::default(),
            design_document_review_status: ReviewStatus::NotStarted,
            design_document_review_feedback: Vec::new(),
            code: BTreeMap::new(),
            code_review_status: ReviewStatus::NotStarted,
            code_review_feedback: Vec::new(),
            security_review: String::new(),
            security_review_status: ReviewStatus::NotStarted,
            security_review_feedback: Vec::new(),
            test_cases: String::new(),
            test_cases_review_status: ReviewStatus::NotStarted,
            test_cases_review_feedback: Vec::new(),
            qa_report: String::new(),
            qa_review_status: ReviewStatus::NotStarted,
            qa_review_feedback: Vec::new(),
            deployment: String::new(),
            quality_metrics: BTreeMap::new(),
            autonomous_decisions: Vec::new(),
            decisions: Vec::new(),
        }
    }

    pub fn status(&self, stage: Stage) -> ReviewStatus {
        match stage {
            Stage::Requirements if self.requirements.trim().is_empty() => ReviewStatus::NotStarted,
            Stage::Requirements => ReviewStatus::Approved,
            Stage::UserStories => self.user_story_status,
            Stage::DesignDocument => self.design_document_review_status,
            Stage::Code => self.code_review_status,
            Stage::SecurityReview => self.security_review_status,
            Stage::TestCases => self.test_cases_review_status,
            Stage::Qa => self.qa_review_status,
            Stage::Deployment if self.deployment.trim().is_empty() => ReviewStatus::NotStarted,
            Stage::Deployment => ReviewStatus::Approved,
        }
    }

    pub fn feedback(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::UserStories => &self.user_story_feedback,
            Stage::DesignDocument => &self.design_document_review_feedback,
            Stage::Code => &self.code_review_feedback,
            Stage::SecurityReview => &self.security_review_feedback,
            Stage::TestCases => &self.test_cases_review_feedback,
            Stage::Qa => &self.qa_review_feedback,
            Stage::Requirements | Stage::Deployment => &[],
        }
    }

    /// Most recent reviewer feedback for the stage, if it was last denied.
    pub fn pending_feedback(&self, stage: Stage) -> Option<&str> {
        if self.status(stage) != ReviewStatus::Denied {
            return None;
        }
        self.feedback(stage).last().map(String::as_str)
    }

    pub fn has_artifact(&self, stage: Stage) -> bool {
        match stage {
            Stage::Requirements => !self.requirements.trim().is_empty(),
            Stage::UserStories => !self.user_stories.is_empty(),
            Stage::DesignDocument => !self.design_document.is_empty(),
            Stage::Code => !self.code.is_empty(),
            Stage::SecurityReview => !self.security_review.trim().is_empty(),
            Stage::TestCases => !self.test_cases.trim().is_empty(),
            Stage::Qa => !self.qa_report.trim().is_empty(),
            Stage::Deployment => !self.deployment.trim().is_empty(),
        }
    }

    /// True when the stage has nothing under review or approved, so advancing must generate.
    pub fn needs_generation(&self, stage: Stage) -> bool {
        matches!(self.status(stage), ReviewStatus::NotStarted | ReviewStatus::Denied)
    }

    /// Number of times the quality policy has sent this stage back.
    pub fn policy_denials(&self, stage: Stage) -> usize {
        self.decisions
            .iter()
            .filter(|d| {
                d.stage == stage
                    && d.outcome == ReviewOutcome::Denied
                    && d.decided_by == DecidedBy::Policy
            })
            .count()
    }

    /// The stage artifact rendered as text, for reviewers and prompts.
    pub fn artifact_text(&self, stage: Stage) -> String {
        match stage {
            Stage::Requirements => self.requirements.clone(),
            Stage::UserStories => self
                .user_stories
                .iter()
                .enumerate()
                .map(|(i, story)| format!("{}. {story}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"),
            Stage::DesignDocument => self.design_document.render(),
            Stage::Code => render_code(&self.code),
            Stage::SecurityReview => self.security_review.clone(),
            Stage::TestCases => self.test_cases.clone(),
            Stage::Qa => self.qa_report.clone(),
            Stage::Deployment => self.deployment.clone(),
        }
    }

    pub fn code_text(&self) -> String {
        self.code.values().cloned().collect::<Vec<_>>().join("\n\n")
    }

    /// Store a freshly generated artifact. Gated stages become `Pending`.
    pub fn with_artifact(mut self, artifact: Artifact) -> Result<Self> {
        let stage = artifact.stage();
        if stage.is_gated() && self.status(stage) == ReviewStatus::Approved {
            return Err(AppError::validation(
                stage,
                "artifact is already approved and cannot be replaced",
            ));
        }
        if artifact.is_empty() {
            return Err(AppError::validation(stage, "generated artifact is empty"));
        }

        match artifact {
            Artifact::UserStories(stories) => self.user_stories = stories,
            Artifact::DesignDocument(doc) => self.design_document = doc,
            Artifact::Code(files) => self.code = files,
            Artifact::SecurityReview(text) => self.security_review = text,
            Artifact::TestCases(text) => self.test_cases = text,
            Artifact::Qa(text) => self.qa_report = text,
            Artifact::Deployment(text) => self.deployment = text,
        }

        if let Some(status) = self.status_mut(stage) {
            *status = ReviewStatus::Pending;
        }
        Ok(self)
    }

    /// Apply a gate decision to a stage that is awaiting review.
    pub fn with_decision(mut self, decision: ReviewDecision) -> Result<Self> {
        let stage = decision.stage;
        if self.status(stage) != ReviewStatus::Pending {
            return Err(AppError::NotAwaitingReview { stage });
        }

        match decision.outcome {
            ReviewOutcome::Approved => {
                if let Some(status) = self.status_mut(stage) {
                    *status = ReviewStatus::Approved;
                }
            }
            ReviewOutcome::Denied => {
                if let Some(status) = self.status_mut(stage) {
                    *status = ReviewStatus::Denied;
                }
                if let Some(feedback) = self.feedback_mut(stage) {
                    feedback.push(decision.feedback.clone());
                }
            }
        }

        self.decisions.push(decision);
        Ok(self)
    }

    /// Record scorecard values under `<stage>.<metric>` keys.
    pub fn with_quality_metrics<I>(mut self, stage: Stage, metrics: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, f64)>,
    {
        for (name, value) in metrics {
            self.quality_metrics
                .insert(format!("{}.{name}", stage.as_str()), value);
        }
        self
    }

    pub fn with_autonomous_decision(mut self, record: AutonomousDecision) -> Self {
        self.autonomous_decisions.push(record);
        self
    }

    /// Every stage artifact is present and every gate approved.
    pub fn is_complete(&self) -> bool {
        Stage::all()
            .iter()
            .all(|&stage| self.has_artifact(stage) && self.status(stage) == ReviewStatus::Approved)
    }

    fn status_mut(&mut self, stage: Stage) -> Option<&mut ReviewStatus> {
        match stage {
            Stage::UserStories => Some(&mut self.user_story_status),
            Stage::DesignDocument => Some(&mut self.design_document_review_status),
            Stage::Code => Some(&mut self.code_review_status),
            Stage::SecurityReview => Some(&mut self.security_review_status),
            Stage::TestCases => Some(&mut self.test_cases_review_status),
            Stage::Qa => Some(&mut self.qa_review_status),
            Stage::Requirements | Stage::Deployment => None,
        }
    }

    fn feedback_mut(&mut self, stage: Stage) -> Option<&mut Vec<String>> {
        match stage {
            Stage::UserStories => Some(&mut self.user_story_feedback),
            Stage::DesignDocument => Some(&mut self.design_document_review_feedback),
            Stage::Code => Some(&mut self.code_review_feedback),
            Stage::SecurityReview => Some(&mut self.security_review_feedback),
            Stage::TestCases => Some(&mut self.test_cases_review_feedback),
            Stage::Qa => Some(&mut self.qa_review_feedback),
            Stage::Requirements | Stage::Deployment => None,
        }
    }
}

fn render_code(files: &BTreeMap<String, String>) -> String {
    files
        .iter()
        .map(|(name, body)| format!("Filename: {name}\n```\n{body}\n```"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(
            "Build a CRUD API",
            Language::Python,
            "test-model",
            AutonomyLevel::Manual,
        )
    }

    fn stories() -> Artifact {
        Artifact::UserStories(vec![
            "As a user, I want to create items so that I can track them".to_string(),
        ])
    }

    #[test]
    fn test_blank_denial_gets_default_reason() {
        let decision = ReviewDecision::deny(Stage::Code, "   ", DecidedBy::Human);
        assert_eq!(decision.feedback, NO_REASON_PROVIDED);
        assert_eq!(decision.outcome, ReviewOutcome::Denied);
    }

    #[test]
    fn test_new_artifact_is_pending() {
        let s = state().with_artifact(stories()).unwrap();
        assert_eq!(s.status(Stage::UserStories), ReviewStatus::Pending);
        assert!(!s.needs_generation(Stage::UserStories));
    }

    #[test]
    fn test_denial_appends_feedback_and_requests_regeneration() {
        let s = state()
            .with_artifact(stories())
            .unwrap()
            .with_decision(ReviewDecision::deny(
                Stage::UserStories,
                "too vague",
                DecidedBy::Human,
            ))
            .unwrap();

        assert_eq!(s.status(Stage::UserStories), ReviewStatus::Denied);
        assert_eq!(s.user_story_feedback, vec!["too vague".to_string()]);
        assert_eq!(s.pending_feedback(Stage::UserStories), Some("too vague"));
        assert!(s.needs_generation(Stage::UserStories));
        assert_eq!(s.decisions.len(), 1);
    }

    #[test]
    fn test_approved_artifact_is_read_only() {
        let s = state()
            .with_artifact(stories())
            .unwrap()
            .with_decision(ReviewDecision::approve(Stage::UserStories, DecidedBy::Human))
            .unwrap();

        let err = s.with_artifact(stories()).unwrap_err();
        assert!(matches!(err, AppError::Validation { stage: Stage::UserStories, .. }));
    }

    #[test]
    fn test_decision_requires_pending_artifact() {
        let err = state()
            .with_decision(ReviewDecision::approve(Stage::Code, DecidedBy::Human))
            .unwrap_err();
        assert!(matches!(err, AppError::NotAwaitingReview { stage: Stage::Code }));
    }

    #[test]
    fn test_empty_artifact_rejected() {
        let err = state()
            .with_artifact(Artifact::TestCases("  ".into()))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { stage: Stage::TestCases, .. }));
    }

    #[test]
    fn test_schema_field_names() {
        let json = serde_json::to_value(state()).unwrap();
        for key in [
            "requirements",
            "programming_language",
            "llm_model",
            "autonomy_level",
            "user_stories",
            "user_story_status",
            "user_story_feedback",
            "design_document",
            "design_document_review_status",
            "code",
            "code_review_status",
            "security_review_status",
            "security_review_feedback",
            "test_cases",
            "test_cases_review_status",
            "qa_review_status",
            "deployment",
            "quality_metrics",
            "autonomous_decisions",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
        assert_eq!(json["design_document"]["open_questions"], serde_json::json!([]));
    }
}
