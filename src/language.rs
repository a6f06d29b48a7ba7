//! Source file → language descriptor lookup

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::config::Preferences;
use crate::error::{Error, Result};

/// Exit code a compiler uses to report a failed build.
///
/// Compared as a sentinel: other non-zero codes are treated as a build that
/// succeeded with warnings.
pub const COMPILE_FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Rust,
    Java,
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::C,
        Language::Cpp,
        Language::Rust,
        Language::Java,
        Language::Python,
        Language::JavaScript,
    ];

    /// Name used as key in the preferences file
    pub fn name(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "c++" => Some(Language::Cpp),
            "rs" => Some(Language::Rust),
            "java" => Some(Language::Java),
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            _ => None,
        }
    }

    /// Interpreted languages run the source directly
    pub fn skip_compile(self) -> bool {
        matches!(self, Language::Python | Language::JavaScript)
    }

    fn default_compiler(self) -> &'static str {
        match self {
            Language::C => "gcc",
            Language::Cpp => "g++",
            Language::Rust => "rustc",
            Language::Java => "javac",
            Language::Python => "python3",
            Language::JavaScript => "node",
        }
    }

    fn default_runtime(self) -> Option<&'static str> {
        match self {
            Language::Java => Some("java"),
            Language::Python => Some("python3"),
            Language::JavaScript => Some("node"),
            Language::C | Language::Cpp | Language::Rust => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to build and launch one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageDescriptor {
    pub language: Language,
    /// For interpreted languages this is the interpreter itself
    pub compiler_executable: String,
    pub runtime_executable: Option<String>,
    pub extra_args: Vec<String>,
    pub skip_compile: bool,
    pub failure_exit_code: i32,
}

impl LanguageDescriptor {
    pub fn name(&self) -> &'static str {
        self.language.name()
    }
}

/// Resolve the language of `source_path`, applying the user's overrides.
pub fn resolve(source_path: &Path, prefs: &Preferences) -> Result<LanguageDescriptor> {
    let language = source_path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        .ok_or_else(|| Error::UnsupportedLanguage(source_path.to_path_buf()))?;

    let pref = prefs.language(language.name());
    let runtime_executable = pref
        .and_then(|p| non_empty(&p.runtime))
        .map(str::to_string)
        .or_else(|| language.default_runtime().map(str::to_string));

    let compiler_executable = match pref.and_then(|p| non_empty(&p.compiler)) {
        Some(compiler) => compiler.to_string(),
        None if language.skip_compile() => runtime_executable
            .clone()
            .unwrap_or_else(|| language.default_compiler().to_string()),
        None => language.default_compiler().to_string(),
    };

    let extra_args = pref
        .map(|p| p.args.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    Ok(LanguageDescriptor {
        language,
        compiler_executable,
        runtime_executable,
        extra_args,
        skip_compile: language.skip_compile(),
        failure_exit_code: COMPILE_FAILURE_EXIT_CODE,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
