use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of the fixed SDLC sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requirements,
    UserStories,
    DesignDocument,
    Code,
    SecurityReview,
    TestCases,
    Qa,
    Deployment,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Requirements,
            Stage::UserStories,
            Stage::DesignDocument,
            Stage::Code,
            Stage::SecurityReview,
            Stage::TestCases,
            Stage::Qa,
            Stage::Deployment,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Stage> {
        Stage::all().get(self.index() + 1).copied()
    }

    /// Stages whose artifact must pass a review gate before the run moves on.
    pub fn is_gated(self) -> bool {
        !matches!(self, Stage::Requirements | Stage::Deployment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements",
            Stage::UserStories => "user_stories",
            Stage::DesignDocument => "design_document",
            Stage::Code => "code",
            Stage::SecurityReview => "security_review",
            Stage::TestCases => "test_cases",
            Stage::Qa => "qa",
            Stage::Deployment => "deployment",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::Requirements => "Requirements",
            Stage::UserStories => "User Stories",
            Stage::DesignDocument => "Design Document",
            Stage::Code => "Code",
            Stage::SecurityReview => "Security Review",
            Stage::TestCases => "Test Cases",
            Stage::Qa => "QA",
            Stage::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Stage::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| crate::error::AppError::Internal(format!("unknown stage: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_follow_fixed_order() {
        let mut stage = Stage::Requirements;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, Stage::all());
        assert!(Stage::Deployment.next().is_none());
    }

    #[test]
    fn test_only_middle_stages_are_gated() {
        assert!(!Stage::Requirements.is_gated());
        assert!(Stage::UserStories.is_gated());
        assert!(Stage::Qa.is_gated());
        assert!(!Stage::Deployment.is_gated());
    }

    #[test]
    fn test_parse_accepts_titles_and_keys() {
        assert_eq!("user_stories".parse::<Stage>().unwrap(), Stage::UserStories);
        assert_eq!("Security Review".parse::<Stage>().unwrap(), Stage::SecurityReview);
        assert_eq!("test-cases".parse::<Stage>().unwrap(), Stage::TestCases);
        assert!("launch".parse::<Stage>().is_err());
    }
}
