use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use serde::Serialize;
use tokio::process::Command;

use crate::artifact::{self, ArtifactPath};
use crate::config::Preferences;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::judge::capture::{self, Capture};
use crate::judge::process;
use crate::language::{self, Language, LanguageDescriptor};

/// Persists unsaved editor changes before a compile.
///
/// Implemented by the editor integration; the command line has nothing to
/// flush and uses [`NoPendingEdits`].
pub trait SourceSaver: Send + Sync {
    fn save(&self, source_path: &Path) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPendingEdits;

impl SourceSaver for NoPendingEdits {
    fn save(&self, _source_path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

/// Result of compilation process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileResult {
    pub success: bool,
    /// Compiler stderr; may be non-empty on success (warnings)
    pub diagnostics: String,
}

impl CompileResult {
    fn succeeded(diagnostics: String) -> Self {
        Self {
            success: true,
            diagnostics,
        }
    }

    fn failed(diagnostics: String) -> Self {
        Self {
            success: false,
            diagnostics,
        }
    }
}

pub struct Compiler {
    events: EventSink,
    saver: Arc<dyn SourceSaver>,
}

impl Compiler {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            saver: Arc::new(NoPendingEdits),
        }
    }

    pub fn with_source_saver(mut self, saver: impl SourceSaver + 'static) -> Self {
        self.saver = Arc::new(saver);
        self
    }

    /// Compile `source_path` with the given preferences.
    ///
    /// Interpreted languages succeed immediately without starting a
    /// process. Compiler failures are reported through the returned
    /// [`CompileResult`]; `Err` is reserved for requests that cannot even be
    /// attempted (unsupported language, unsaved source, ...).
    pub async fn compile(&self, source_path: &Path, prefs: &Preferences) -> Result<CompileResult> {
        self.saver
            .save(source_path)
            .map_err(|source| Error::SaveSource {
                path: source_path.to_path_buf(),
                source,
            })?;

        let descriptor = language::resolve(source_path, prefs)?;
        if descriptor.skip_compile {
            log::debug!("{} is interpreted, nothing to compile", descriptor.name());
            return Ok(CompileResult::succeeded(String::new()));
        }

        let artifact = artifact::locate(source_path, &descriptor, prefs.save_location())?;
        if prefs.save_location().is_some() {
            tokio::fs::create_dir_all(artifact.dir()).await?;
        }

        self.events.emit(Event::CompilingStart);
        let result = self
            .run_compiler(source_path, &descriptor, &artifact, prefs)
            .await;

        if !result.diagnostics.is_empty() {
            self.events.emit(Event::CompileDiagnostics {
                diagnostics: result.diagnostics.clone(),
            });
        }
        self.events.emit(Event::CompilingStop);
        if !result.success {
            self.events.emit(Event::NotRunning);
        }

        Ok(result)
    }

    async fn run_compiler(
        &self,
        source_path: &Path,
        descriptor: &LanguageDescriptor,
        artifact: &ArtifactPath,
        prefs: &Preferences,
    ) -> CompileResult {
        let args = compile_args(source_path, descriptor, artifact, prefs.online_judge);
        log::info!(
            "Compiling {} with `{}`",
            source_path.display(),
            descriptor.compiler_executable
        );
        log::debug!("Compiler arguments: {args:?}");

        let mut cmd = Command::new(&descriptor.compiler_executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let error = Error::CompilerLaunch {
                    executable: descriptor.compiler_executable.clone(),
                    source,
                };
                log::error!("{error}");
                return CompileResult::failed(error.to_string());
            }
        };
        let pid = child.id();
        let stderr = child.stderr.take().map(Capture::unbounded);

        let status = match tokio::time::timeout(prefs.compile_timeout(), child.wait()).await {
            Ok(Ok(status)) => {
                process::kill_process_group(pid);
                status
            }
            Ok(Err(e)) => {
                process::terminate(&mut child).await;
                let diagnostics = capture::collect(stderr).await;
                return CompileResult::failed(format!(
                    "{diagnostics}Failed to wait for the compiler: {e}"
                ));
            }
            Err(_) => {
                log::error!(
                    "Compilation timed out after {}ms",
                    prefs.compile_timeout_ms
                );
                process::terminate(&mut child).await;
                let diagnostics = capture::collect(stderr).await;
                return CompileResult::failed(format!(
                    "{diagnostics}Compilation timed out after {}ms",
                    prefs.compile_timeout_ms
                ));
            }
        };

        let diagnostics = capture::collect(stderr).await;
        interpret_exit(status.code(), descriptor.failure_exit_code, diagnostics)
    }
}

/// Build the compiler argument list for `descriptor.language`.
pub fn compile_args(
    source_path: &Path,
    descriptor: &LanguageDescriptor,
    artifact: &ArtifactPath,
    online_judge: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![source_path.into()];

    match descriptor.language {
        Language::Java => {
            args.push("-d".into());
            args.push(artifact.dir().into());
        }
        _ => {
            args.push("-o".into());
            args.push(artifact.path().into());
        }
    }

    args.extend(descriptor.extra_args.iter().map(OsString::from));

    if descriptor.language == Language::Cpp {
        args.extend(["-D", "DEBUG", "-D", "CPH"].map(OsString::from));
    }
    if online_judge && matches!(descriptor.language, Language::C | Language::Cpp) {
        args.extend(["-D", "ONLINE_JUDGE"].map(OsString::from));
    }

    args
}

/// Classify a finished compiler process.
///
/// Only the language's failure sentinel counts as a failed build; any other
/// exit is a success, with warnings when stderr is non-empty.
fn interpret_exit(exit_code: Option<i32>, failure_code: i32, diagnostics: String) -> CompileResult {
    if exit_code == Some(failure_code) {
        log::error!("Compilation failed");
        CompileResult::failed(diagnostics)
    } else if !diagnostics.is_empty() {
        log::warn!("Compilation succeeded with warnings");
        CompileResult::succeeded(diagnostics)
    } else {
        log::info!("Compilation succeeded");
        CompileResult::succeeded(diagnostics)
    }
}
