use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::language::Language;
use crate::llm::parse::is_safe_file_name;
use crate::workflow::stage::Stage;
use crate::workflow::state::{ReviewStatus, WorkflowState};

/// Write the approved artifacts of a run out as a project tree under `dir`.
///
/// Code is required and must be approved. Tests are written only once the
/// test cases stage is approved; the deployment plan and script only once
/// the run has produced one. Returns the written paths relative to `dir`.
pub async fn export_project(state: &WorkflowState, dir: &Path) -> Result<Vec<PathBuf>> {
    if state.code_review_status != ReviewStatus::Approved {
        return Err(AppError::validation(
            Stage::Code,
            format!("only approved code can be exported (status: {:?})", state.code_review_status),
        ));
    }
    if state.code.is_empty() {
        return Err(AppError::validation(Stage::Code, "no code files to export"));
    }

    let language = state.programming_language;
    let mut files: Vec<(String, String)> = Vec::new();

    for (name, code) in &state.code {
        if !is_safe_file_name(name) {
            tracing::warn!(file = %name, "Not exporting file with unsafe name");
            continue;
        }
        files.push((name.clone(), with_trailing_newline(code)));
    }

    if state.test_cases_review_status == ReviewStatus::Approved && !state.test_cases.trim().is_empty() {
        files.push((test_file(language).to_string(), with_trailing_newline(&state.test_cases)));
    }

    if !state.deployment.trim().is_empty() {
        files.push(("DEPLOYMENT.md".to_string(), with_trailing_newline(&state.deployment)));
        files.push(("deploy.sh".to_string(), deploy_script(language)));
    }

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(&name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await.map_err(|e| {
            AppError::Persistence(format!("Failed to write {}: {e}", path.display()))
        })?;
        tracing::debug!(file = %name, "Exported");
        written.push(PathBuf::from(name));
    }

    tracing::info!(dir = %dir.display(), files = written.len(), "Project exported");
    Ok(written)
}

fn with_trailing_newline(text: &str) -> String {
    let mut text = text.trim_end().to_string();
    text.push('\n');
    text
}

/// Where the generated test suite lives in a conventional project layout.
fn test_file(language: Language) -> &'static str {
    match language {
        Language::Python => "tests/test_main.py",
        Language::Javascript => "tests/app.test.js",
        Language::Typescript => "tests/app.test.ts",
        Language::Java => "src/test/java/AppTest.java",
        Language::Go => "main_test.go",
        Language::Csharp => "Tests/AppTests.cs",
        Language::Php => "tests/AppTest.php",
        Language::Rust => "tests/integration.rs",
    }
}

fn deploy_script(language: Language) -> String {
    let (install, test, start) = match language {
        Language::Python => ("pip install -r requirements.txt", "pytest", "python main.py"),
        Language::Javascript | Language::Typescript => ("npm install", "npm test", "npm start"),
        Language::Java => ("mvn clean compile", "mvn test", "mvn exec:java"),
        Language::Go => ("go mod download", "go test ./...", "go run ."),
        Language::Csharp => ("dotnet restore", "dotnet test", "dotnet run"),
        Language::Php => ("composer install", "vendor/bin/phpunit", "php -S 0.0.0.0:8000 index.php"),
        Language::Rust => ("cargo build --release", "cargo test", "cargo run --release"),
    };
    format!(
        "#!/bin/bash\n# Deployment script for a {} project\nset -euo pipefail\n\n{install}\n{test}\n{start}\n",
        language.profile().name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AutonomyLevel;
    use crate::workflow::state::{Artifact, DecidedBy, ReviewDecision};

    fn approved(state: WorkflowState, artifact: Artifact) -> WorkflowState {
        let stage = artifact.stage();
        state
            .with_artifact(artifact)
            .unwrap()
            .with_decision(ReviewDecision::approve(stage, DecidedBy::Human))
            .unwrap()
    }

    fn with_code() -> WorkflowState {
        let state = WorkflowState::new("Build a CRUD API", Language::Python, "m", AutonomyLevel::Manual);
        let mut code = std::collections::BTreeMap::new();
        code.insert("main.py".to_string(), "print('hi')".to_string());
        code.insert("app/models.py".to_string(), "class Item: pass".to_string());
        approved(state, Artifact::Code(code))
    }

    #[tokio::test]
    async fn test_exports_approved_code_and_tests() {
        let tmp = tempfile::tempdir().unwrap();
        let state = approved(with_code(), Artifact::TestCases("def test_item(): pass".into()));

        let written = export_project(&state, tmp.path()).await.unwrap();

        assert_eq!(
            written,
            vec![
                PathBuf::from("app/models.py"),
                PathBuf::from("main.py"),
                PathBuf::from("tests/test_main.py"),
            ]
        );
        let main = std::fs::read_to_string(tmp.path().join("main.py")).unwrap();
        assert_eq!(main, "print('hi')\n");
        assert!(tmp.path().join("tests/test_main.py").exists());
        assert!(!tmp.path().join("deploy.sh").exists());
    }

    #[tokio::test]
    async fn test_deployment_adds_plan_and_script() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = with_code();
        state.deployment = "Ship it to staging first.".to_string();

        let written = export_project(&state, tmp.path()).await.unwrap();
        assert!(written.contains(&PathBuf::from("DEPLOYMENT.md")));

        let script = std::fs::read_to_string(tmp.path().join("deploy.sh")).unwrap();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("pytest"));
    }

    #[tokio::test]
    async fn test_unapproved_code_is_not_exported() {
        let tmp = tempfile::tempdir().unwrap();
        let state = WorkflowState::new("Build a CRUD API", Language::Go, "m", AutonomyLevel::Manual);
        let mut code = std::collections::BTreeMap::new();
        code.insert("main.go".to_string(), "package main".to_string());
        let pending = state.with_artifact(Artifact::Code(code)).unwrap();

        let err = export_project(&pending, tmp.path()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { stage: Stage::Code, .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_names_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = with_code();
        state.code.insert("../escape.py".to_string(), "x = 1".to_string());

        let written = export_project(&state, tmp.path()).await.unwrap();
        assert!(!written.contains(&PathBuf::from("../escape.py")));
        assert!(!tmp.path().parent().unwrap().join("escape.py").exists());
    }
}
