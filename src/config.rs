use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 60_000;

#[derive(Parser)]
#[command(name = "cph", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Source file to compile and judge
    pub source: PathBuf,

    /// Problem file holding the test cases (defaults to `<SOURCE>.prob`)
    #[arg(long = "cases", short = 't')]
    pub cases_path: Option<PathBuf>,

    /// Path to the preferences file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Time limit of each test case, in milliseconds
    #[arg(long = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Define ONLINE_JUDGE when compiling
    #[arg(long = "online-judge", default_value_t = false)]
    pub online_judge: bool,

    /// Directory to write compiled binaries to
    #[arg(long = "save-location")]
    pub save_location: Option<PathBuf>,

    /// Only compile, do not run any test case
    #[arg(long = "compile-only", default_value_t = false)]
    pub compile_only: bool,

    /// Print the final report as JSON
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

impl CliArgs {
    /// Load the preferences and apply command line overrides on top.
    ///
    /// Meant to be called right before every compile, so edits to the
    /// preferences file take effect on the next run.
    pub fn to_preferences(&self) -> io::Result<Preferences> {
        let mut prefs = match &self.config_path {
            Some(path) => Preferences::load(path)?,
            None => match default_preferences_path() {
                Some(path) if path.exists() => Preferences::load(&path)?,
                _ => Preferences::default(),
            },
        };

        if let Some(timeout_ms) = self.timeout_ms {
            prefs.timeout_ms = timeout_ms;
        }
        if self.online_judge {
            prefs.online_judge = true;
        }
        if let Some(dir) = &self.save_location {
            prefs.save_location = Some(dir.clone());
        }

        Ok(prefs)
    }

    pub fn cases_path(&self) -> PathBuf {
        self.cases_path.clone().unwrap_or_else(|| {
            let mut name = self.source.as_os_str().to_owned();
            name.push(".prob");
            PathBuf::from(name)
        })
    }
}

/// Location of the preferences file when `--config` is not given
pub fn default_preferences_path() -> Option<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "cph")?;
    Some(proj_dirs.config_dir().join("preferences.json"))
}

/// User preferences, read fresh at the start of each compile
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Preferences {
    /// Directory compiled artifacts are written to; empty means "next to the source"
    pub save_location: Option<PathBuf>,
    /// Define `ONLINE_JUDGE` for the compiled program
    pub online_judge: bool,
    pub timeout_ms: u64,
    pub compile_timeout_ms: u64,
    /// Per-language overrides, keyed by language name (`cpp`, `python`, ...)
    pub languages: HashMap<String, LanguagePreference>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            save_location: None,
            online_judge: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            languages: HashMap::new(),
        }
    }
}

impl Preferences {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }

    /// The save location override, if one is configured and non-empty
    pub fn save_location(&self) -> Option<&Path> {
        self.save_location
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    pub fn language(&self, name: &str) -> Option<&LanguagePreference> {
        self.languages.get(name)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct LanguagePreference {
    /// Compiler executable name or path
    pub compiler: Option<String>,
    /// Extra compiler flags, whitespace separated
    pub args: String,
    /// Interpreter / VM executable name or path
    pub runtime: Option<String>,
}

/// A problem file: the test cases of one source file
#[derive(Deserialize, Debug)]
pub struct CaseFile {
    pub tests: Vec<CaseSpec>,
}

#[derive(Deserialize, Debug)]
pub struct CaseSpec {
    pub input: String,
    pub output: String,
}

impl CaseFile {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_deserialization() {
        let prefs = Preferences::load("data/preferences.example.json").unwrap();
        assert_eq!(prefs.timeout_ms, 5000);
        assert!(!prefs.online_judge);
        assert_eq!(prefs.save_location(), None);
        assert_eq!(prefs.language("cpp").unwrap().args, "-O2 -std=c++17");
        assert_eq!(
            prefs.language("python").unwrap().runtime.as_deref(),
            Some("pypy3")
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let prefs: Preferences = serde_json::from_str(r#"{"online_judge": true}"#).unwrap();
        assert!(prefs.online_judge);
        assert_eq!(prefs.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(prefs.compile_timeout(), Duration::from_secs(60));
        assert!(prefs.languages.is_empty());
    }

    #[test]
    fn test_case_file_deserialization() {
        let cases = CaseFile::load("data/cases.example.prob").unwrap();
        assert_eq!(cases.tests.len(), 2);
        assert_eq!(cases.tests[0].input, "1 2\n");
        assert_eq!(cases.tests[0].output, "3\n");
    }

    #[test]
    fn test_cli_overrides_preferences() {
        let cli = CliArgs::parse_from([
            "cph",
            "a.cpp",
            "--config",
            "data/preferences.example.json",
            "--timeout",
            "250",
            "--online-judge",
            "--save-location",
            "/tmp/bin",
        ]);
        let prefs = cli.to_preferences().unwrap();
        assert_eq!(prefs.timeout_ms, 250);
        assert!(prefs.online_judge);
        assert_eq!(prefs.save_location(), Some(Path::new("/tmp/bin")));
        assert_eq!(cli.cases_path(), PathBuf::from("a.cpp.prob"));
    }
}
