use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Target languages the generator knows how to prompt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    Python,
    Javascript,
    Typescript,
    Java,
    Go,
    Csharp,
    Php,
    Rust,
}

/// Static conventions for a target language.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LanguageProfile {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub comment_style: &'static str,
    pub test_framework: &'static str,
    pub package_manager: &'static str,
    pub entry_point: &'static str,
    pub manifest: &'static str,
}

impl Language {
    pub fn all() -> &'static [Language] {
        &[
            Language::Python,
            Language::Javascript,
            Language::Typescript,
            Language::Java,
            Language::Go,
            Language::Csharp,
            Language::Php,
            Language::Rust,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Csharp => "csharp",
            Language::Php => "php",
            Language::Rust => "rust",
        }
    }

    pub fn profile(self) -> LanguageProfile {
        match self {
            Language::Python => LanguageProfile {
                name: "Python",
                extensions: &[".py"],
                comment_style: "#",
                test_framework: "pytest",
                package_manager: "pip",
                entry_point: "main.py",
                manifest: "requirements.txt",
            },
            Language::Javascript => LanguageProfile {
                name: "JavaScript",
                extensions: &[".js", ".mjs"],
                comment_style: "//",
                test_framework: "jest",
                package_manager: "npm",
                entry_point: "index.js",
                manifest: "package.json",
            },
            Language::Typescript => LanguageProfile {
                name: "TypeScript",
                extensions: &[".ts", ".tsx"],
                comment_style: "//",
                test_framework: "jest",
                package_manager: "npm",
                entry_point: "index.ts",
                manifest: "package.json",
            },
            Language::Java => LanguageProfile {
                name: "Java",
                extensions: &[".java"],
                comment_style: "//",
                test_framework: "junit",
                package_manager: "maven",
                entry_point: "Main.java",
                manifest: "pom.xml",
            },
            Language::Go => LanguageProfile {
                name: "Go",
                extensions: &[".go"],
                comment_style: "//",
                test_framework: "testing",
                package_manager: "go mod",
                entry_point: "main.go",
                manifest: "go.mod",
            },
            Language::Csharp => LanguageProfile {
                name: "C#",
                extensions: &[".cs"],
                comment_style: "//",
                test_framework: "nunit",
                package_manager: "nuget",
                entry_point: "Program.cs",
                manifest: "project.csproj",
            },
            Language::Php => LanguageProfile {
                name: "PHP",
                extensions: &[".php"],
                comment_style: "//",
                test_framework: "phpunit",
                package_manager: "composer",
                entry_point: "index.php",
                manifest: "composer.json",
            },
            Language::Rust => LanguageProfile {
                name: "Rust",
                extensions: &[".rs"],
                comment_style: "//",
                test_framework: "cargo test",
                package_manager: "cargo",
                entry_point: "main.rs",
                manifest: "Cargo.toml",
            },
        }
    }

    /// Naming and layout conventions handed to the code generator.
    pub fn conventions(self) -> &'static str {
        match self {
            Language::Python => {
                "- snake_case for modules and functions\n- type hints and docstrings\n- PEP 8 layout: main.py, models.py, services.py, config.py"
            }
            Language::Javascript => {
                "- camelCase functions, PascalCase classes\n- ES modules and JSDoc comments\n- layout: index.js, models.js, services.js, config.js"
            }
            Language::Typescript => {
                "- camelCase functions, PascalCase types\n- interfaces for all data structures, strict mode\n- layout: index.ts, models.ts, services.ts, types.ts"
            }
            Language::Java => {
                "- camelCase methods, PascalCase classes\n- Javadoc on public types\n- layout: Main.java, models/, services/, config/"
            }
            Language::Go => {
                "- exported identifiers in PascalCase\n- godoc comments, errors returned not panicked\n- layout: main.go, models/, services/"
            }
            Language::Csharp => {
                "- PascalCase public members, camelCase private fields\n- XML documentation comments\n- layout: Program.cs, Models/, Services/"
            }
            Language::Php => {
                "- PSR-12 style, PascalCase classes\n- DocBlock comments\n- layout: index.php, Models/, Services/"
            }
            Language::Rust => {
                "- snake_case functions, PascalCase types\n- Result-based error handling and rustdoc comments\n- layout: main.rs, lib.rs, models/, services/"
            }
        }
    }

    /// Security concerns the reviewer prompt asks about for this language.
    pub fn security_checklist(self) -> &'static [&'static str] {
        match self {
            Language::Python => &[
                "SQL injection through raw queries",
                "Command injection via os.system or subprocess",
                "Unsafe pickle or YAML deserialization",
                "eval/exec usage",
                "Path traversal",
            ],
            Language::Javascript | Language::Typescript => &[
                "XSS through innerHTML or document.write",
                "SQL and NoSQL injection",
                "Prototype pollution",
                "CORS misconfiguration",
                "JWT validation gaps",
            ],
            Language::Java => &[
                "SQL injection",
                "XML external entities",
                "Unsafe deserialization",
                "Path traversal",
                "Insecure random number generation",
            ],
            Language::Go => &[
                "SQL injection",
                "Command injection via exec.Command",
                "Path traversal",
                "Data races",
                "Goroutine leaks",
            ],
            Language::Csharp => &[
                "SQL injection",
                "XSS",
                "Insecure deserialization",
                "Path traversal",
                "Weak cryptography",
            ],
            Language::Php => &[
                "SQL injection",
                "XSS",
                "File inclusion",
                "Command injection",
                "CSRF",
            ],
            Language::Rust => &[
                "Unsafe blocks",
                "Integer overflow",
                "Dependency vulnerabilities",
                "Panics on untrusted input",
                "Input validation",
            ],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = match key.as_str() {
            "js" => "javascript",
            "ts" => "typescript",
            "c#" | "cs" => "csharp",
            "golang" => "go",
            "py" => "python",
            "rs" => "rust",
            other => other,
        };
        Language::all()
            .iter()
            .copied()
            .find(|lang| lang.as_str() == key)
            .ok_or_else(|| AppError::Config(format!("Unsupported language: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("TS".parse::<Language>().unwrap(), Language::Typescript);
        assert_eq!("c#".parse::<Language>().unwrap(), Language::Csharp);
        assert_eq!("golang".parse::<Language>().unwrap(), Language::Go);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_every_language_has_an_entry_point_with_its_extension() {
        for lang in Language::all() {
            let profile = lang.profile();
            assert!(
                profile
                    .extensions
                    .iter()
                    .any(|ext| profile.entry_point.ends_with(ext)),
                "{lang} entry point does not match its extensions"
            );
        }
    }
}
