use crate::error::{AppError, Result};
use crate::workflow::stage::Stage;
use crate::workflow::state::WorkflowState;

/// Build the generation prompt for a stage.
///
/// The prompt depends only on the stage and the state, so regenerating from
/// the same checkpoint sends the same text.
pub fn build_prompt(stage: Stage, state: &WorkflowState) -> Result<String> {
    let language = state.programming_language;
    let profile = language.profile();

    let task = match stage {
        Stage::Requirements => {
            return Err(AppError::validation(
                stage,
                "requirements are supplied by the user, not generated",
            ))
        }
        Stage::UserStories => format!(
            r#"## Requirements
{requirements}

## Task
Write the user stories for these requirements.
- One story per line, as a numbered list.
- Use the form "As a <role>, I want <capability> so that <benefit>".
- Cover every requirement; add acceptance criteria in parentheses where useful."#,
            requirements = state.requirements,
        ),
        Stage::DesignDocument => format!(
            r#"## Requirements
{requirements}

## User Stories
{stories}

## Task
Write the design document for a {name} implementation. Use exactly these headings,
each followed by a bulleted list:
## Functional Requirements
## Technical Requirements
## Assumptions
## Open Questions"#,
            requirements = state.requirements,
            stories = state.artifact_text(Stage::UserStories),
            name = profile.name,
        ),
        Stage::Code => format!(
            r#"## Design Document
{design}

## User Stories
{stories}

## Task
Implement the design in {name}.
Conventions: {conventions}
The entry point is `{entry}`; dependencies go in `{manifest}` ({package_manager}).

Emit every file in this format and nothing else:
Filename: {entry}
Code:
```{tag}
<file contents>
```"#,
            design = state.artifact_text(Stage::DesignDocument),
            stories = state.artifact_text(Stage::UserStories),
            name = profile.name,
            conventions = language.conventions(),
            entry = profile.entry_point,
            manifest = profile.manifest,
            package_manager = profile.package_manager,
            tag = language.as_str(),
        ),
        Stage::SecurityReview => format!(
            r#"## Code ({name})
{code}

## Task
Review the code for security issues. Check at least:
{checklist}

List each finding with its severity and a concrete fix.
Finish with a single line `Status: Approve` if the code is safe to ship,
or `Status: Denied` if any finding must be fixed first."#,
            name = profile.name,
            code = state.artifact_text(Stage::Code),
            checklist = bullet_list(language.security_checklist()),
        ),
        Stage::TestCases => format!(
            r#"## User Stories
{stories}

## Code ({name})
{code}

## Task
Write {framework} test cases for this code: happy paths, edge cases and error
handling, at least one test per user story. Emit them in the same
`Filename:` / `Code:` format as the code."#,
            stories = state.artifact_text(Stage::UserStories),
            name = profile.name,
            code = state.artifact_text(Stage::Code),
            framework = profile.test_framework,
        ),
        Stage::Qa => format!(
            r#"## Code ({name})
{code}

## Test Cases
{tests}

## Task
Act as QA. Walk through the test cases against the code and report, for each,
whether it passes and why. Summarize coverage gaps, defects found and an overall
verdict (PASS or FAIL)."#,
            name = profile.name,
            code = state.artifact_text(Stage::Code),
            tests = state.test_cases,
        ),
        Stage::Deployment => format!(
            r#"## Code ({name})
{code}

## QA Report
{qa}

## Task
Write a deployment plan: build steps using {package_manager} and `{manifest}`,
the command that starts `{entry}`, required configuration, a container image
outline, monitoring, and a rollback procedure."#,
            name = profile.name,
            code = state.artifact_text(Stage::Code),
            qa = state.qa_report,
            package_manager = profile.package_manager,
            manifest = profile.manifest,
            entry = profile.entry_point,
        ),
    };

    let mut prompt = format!(
        "# {title}\nTarget language: {name}\n\n{task}",
        title = stage.title(),
        name = profile.name,
    );

    if let Some(feedback) = state.pending_feedback(stage) {
        prompt.push_str(&format!(
            r#"

## Previous Version
{previous}

## Reviewer Feedback
The previous version was denied with this feedback:
{feedback}

Produce a revised version that addresses every point."#,
            previous = state.artifact_text(stage),
        ));
    }

    Ok(prompt)
}

fn bullet_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::policy::AutonomyLevel;
    use crate::workflow::state::{Artifact, DecidedBy, ReviewDecision};

    fn state() -> WorkflowState {
        WorkflowState::new("Build a CRUD API", Language::Go, "m", AutonomyLevel::Manual)
    }

    #[test]
    fn test_includes_requirements_and_language() {
        let prompt = build_prompt(Stage::UserStories, &state()).unwrap();
        assert!(prompt.contains("Build a CRUD API"));
        assert!(prompt.contains("Target language: Go"));
        assert!(!prompt.contains("Reviewer Feedback"));
    }

    #[test]
    fn test_denied_stage_carries_latest_feedback() {
        let denied = state()
            .with_artifact(Artifact::UserStories(vec!["As a user, I want things".into()]))
            .unwrap()
            .with_decision(ReviewDecision::deny(Stage::UserStories, "too vague", DecidedBy::Human))
            .unwrap();

        let prompt = build_prompt(Stage::UserStories, &denied).unwrap();
        assert!(prompt.contains("too vague"));
        assert!(prompt.contains("As a user, I want things"));
        assert_eq!(prompt, build_prompt(Stage::UserStories, &denied).unwrap());
    }

    #[test]
    fn test_requirements_are_not_generated() {
        assert!(build_prompt(Stage::Requirements, &state()).is_err());
    }

    #[test]
    fn test_code_prompt_names_entry_point() {
        let prompt = build_prompt(Stage::Code, &state()).unwrap();
        assert!(prompt.contains("Filename: main.go"));
    }
}
