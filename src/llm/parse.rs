use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::language::Language;
use crate::workflow::stage::Stage;
use crate::workflow::state::{Artifact, DesignDocument};

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(?P<item>.+)$").expect("valid regex"));

static FILE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)Filename:\**\s*[`*]*(?P<name>[\w./-]+)[`*]*\s*(?:\**Code:\**)?\s*```[^\n]*\n(?P<code>.*?)```",
    )
    .expect("valid regex")
});

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n(?P<code>.*?)```").expect("valid regex"));

/// Turn a raw generation response into the typed artifact for `stage`.
///
/// A response with nothing usable in it is a validation error.
pub fn parse_artifact(stage: Stage, response: &str, language: Language) -> Result<Artifact> {
    let artifact = match stage {
        Stage::Requirements => {
            return Err(AppError::validation(stage, "requirements are not generated"))
        }
        Stage::UserStories => Artifact::UserStories(parse_user_stories(response)),
        Stage::DesignDocument => Artifact::DesignDocument(parse_design(response)),
        Stage::Code => Artifact::Code(parse_code_files(response, language)),
        Stage::SecurityReview => Artifact::SecurityReview(response.trim().to_string()),
        Stage::TestCases => Artifact::TestCases(response.trim().to_string()),
        Stage::Qa => Artifact::Qa(response.trim().to_string()),
        Stage::Deployment => Artifact::Deployment(response.trim().to_string()),
    };

    if artifact.is_empty() {
        return Err(AppError::validation(
            stage,
            format!("could not extract a {} from the response", stage.title()),
        ));
    }
    Ok(artifact)
}

/// Numbered or bulleted lines; falls back to lines that read like stories.
pub fn parse_user_stories(response: &str) -> Vec<String> {
    let listed: Vec<String> = response
        .lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .map(|caps| clean_item(&caps["item"]))
        .filter(|item| !item.is_empty())
        .collect();

    if !listed.is_empty() {
        return listed;
    }

    response
        .lines()
        .map(clean_item)
        .filter(|line| line.to_lowercase().starts_with("as a"))
        .collect()
}

#[derive(Clone, Copy)]
enum Section {
    Functional,
    Technical,
    Assumptions,
    OpenQuestions,
}

fn section_for(heading: &str) -> Option<Section> {
    let heading = heading.to_lowercase();
    if heading.contains("open question") {
        Some(Section::OpenQuestions)
    } else if heading.contains("assumption") {
        Some(Section::Assumptions)
    } else if heading.contains("technical") || heading.contains("non-functional") {
        Some(Section::Technical)
    } else if heading.contains("functional") {
        Some(Section::Functional)
    } else {
        None
    }
}

fn is_heading(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('#')
        || (line.starts_with("**") && line.ends_with("**"))
        || (line.ends_with(':') && !LIST_ITEM.is_match(line))
}

pub fn parse_design(response: &str) -> DesignDocument {
    let mut doc = DesignDocument::default();
    let mut current: Option<Section> = None;

    for line in response.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if is_heading(line) {
            current = section_for(line);
            continue;
        }
        let Some(section) = current else { continue };
        let Some(caps) = LIST_ITEM.captures(line) else {
            continue;
        };
        let item = clean_item(&caps["item"]);
        if item.is_empty() {
            continue;
        }
        match section {
            Section::Functional => doc.functional.push(item),
            Section::Technical => doc.technical.push(item),
            Section::Assumptions => doc.assumptions.push(item),
            Section::OpenQuestions => doc.open_questions.push(item),
        }
    }

    doc
}

/// `Filename:` blocks keyed by file name. Without any, the first fenced block
/// becomes the language's entry point.
pub fn parse_code_files(response: &str, language: Language) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();

    for caps in FILE_BLOCK.captures_iter(response) {
        let name = &caps["name"];
        if !is_safe_file_name(name) {
            tracing::warn!(file = name, "Skipping generated file with unsafe name");
            continue;
        }
        let code = caps["code"].trim_end();
        if !code.trim().is_empty() {
            files.insert(name.to_string(), code.to_string());
        }
    }

    if files.is_empty() {
        if let Some(caps) = FENCED_BLOCK.captures(response) {
            let code = caps["code"].trim_end();
            if !code.trim().is_empty() {
                files.insert(language.profile().entry_point.to_string(), code.to_string());
            }
        }
    }

    files
}

/// Relative paths only: no leading `/`, no empty or `..` components.
pub(crate) fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.split('/').any(|part| part.is_empty() || part == "..")
}

fn clean_item(item: &str) -> String {
    item.trim().trim_matches('*').trim().to_string()
}
