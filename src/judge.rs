pub(crate) mod capture;
pub(crate) mod process;

pub use capture::{MAX_OUTPUT_CHARS, TRUNCATION_MARKER};

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::artifact::{self, ArtifactPath};
use crate::config::Preferences;
use crate::error::{Error, Result};
use crate::language::{self, Language, LanguageDescriptor};
use capture::Capture;

/// The command that runs a built (or interpreted) program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTarget {
    program: OsString,
    args: Vec<OsString>,
}

impl ExecutionTarget {
    /// Build the launch command for `source_path`, compiled to `artifact`.
    ///
    /// - interpreted languages: `<runtime> <source>`
    /// - Java: `<runtime> -cp <class dir> <class name>`
    /// - everything else: the artifact itself
    pub fn new(
        source_path: &Path,
        artifact: &ArtifactPath,
        descriptor: &LanguageDescriptor,
    ) -> Self {
        let runtime = || {
            descriptor
                .runtime_executable
                .clone()
                .unwrap_or_else(|| descriptor.compiler_executable.clone())
        };

        if descriptor.skip_compile {
            return Self::command(runtime(), [source_path.as_os_str()]);
        }

        match descriptor.language {
            Language::Java => {
                let class_name = source_path.file_stem().unwrap_or_default();
                Self::command(
                    runtime(),
                    [OsStr::new("-cp"), artifact.dir().as_os_str(), class_name],
                )
            }
            _ => Self::command(executable_path(artifact.path()), Vec::<OsString>::new()),
        }
    }

    /// Resolve language and artifact of `source_path` and build its launch
    /// command
    pub fn for_source(source_path: &Path, prefs: &Preferences) -> Result<Self> {
        let descriptor = language::resolve(source_path, prefs)?;
        let artifact = artifact::locate(source_path, &descriptor, prefs.save_location())?;
        Ok(Self::new(source_path, &artifact, &descriptor))
    }

    /// An arbitrary command line
    pub fn command<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A bare file name would be looked up on PATH; anchor it to the current
/// directory instead.
fn executable_path(path: &Path) -> PathBuf {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Path::new(".").join(path),
        _ => path.to_path_buf(),
    }
}

/// Outcome of one judged run. Immutable: a rerun produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    /// Set when the run could not be carried out, e.g. the runtime
    /// executable is missing
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pass: bool,
}

/// Raw facts about a finished process, before comparison
#[derive(Debug, Default)]
pub(crate) struct Execution {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<ExitStatus>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl RunResult {
    pub(crate) fn classify(execution: Execution, expected_output: &str) -> Self {
        let Execution {
            stdout,
            stderr,
            status,
            elapsed,
            timed_out,
        } = execution;

        let exit_signal = status.as_ref().and_then(process::exit_signal);
        let pass = !timed_out && exit_signal.is_none() && outputs_match(&stdout, expected_output);

        Self {
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            exit_signal,
            error: None,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timed_out,
            pass,
        }
    }

    /// Result recorded for a run that failed before producing an outcome,
    /// such as a program that could not be launched
    pub fn from_error(error: &Error) -> Self {
        let message = error.to_string();
        Self {
            stdout: String::new(),
            stderr: message.clone(),
            exit_code: None,
            exit_signal: None,
            error: Some(message),
            elapsed_ms: 0,
            timed_out: false,
            pass: false,
        }
    }

    pub fn pass(&self) -> bool {
        self.pass
    }

    pub fn verdict(&self) -> Verdict {
        if self.error.is_some() {
            Verdict::SystemError
        } else if self.timed_out {
            Verdict::TimeLimitExceeded
        } else if self.exit_signal.is_some() {
            Verdict::RuntimeError
        } else if self.pass {
            Verdict::Accepted
        } else {
            Verdict::WrongAnswer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    SystemError,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::SystemError => "System Error",
        })
    }
}

/// Compares program output with expected output.
///
/// Only leading and trailing whitespace is ignored; everything in between
/// must match exactly.
pub fn outputs_match(program_output: &str, expected_output: &str) -> bool {
    program_output.trim() == expected_output.trim()
}

#[derive(Debug)]
pub enum JudgeOutcome {
    Finished(RunResult),
    /// The run was cancelled; there is no result to report
    Cancelled,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs one program against one test case
#[derive(Debug, Clone)]
pub struct Judge {
    output_limit: usize,
}

impl Default for Judge {
    fn default() -> Self {
        Self {
            output_limit: MAX_OUTPUT_CHARS,
        }
    }
}

impl Judge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap each output stream at `chars` characters
    pub fn with_output_limit(mut self, chars: usize) -> Self {
        self.output_limit = chars;
        self
    }

    /// Run `target` with `input` on stdin and judge its stdout against
    /// `expected_output`.
    ///
    /// The process is killed when `timeout` elapses (the result is then
    /// timed out) or when `cancel` fires (no result at all).
    pub async fn run(
        &self,
        target: &ExecutionTarget,
        input: &str,
        expected_output: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        if cancel.is_cancelled() {
            return Ok(JudgeOutcome::Cancelled);
        }

        log::debug!("Running `{target}` with a {}ms limit", timeout.as_millis());

        let mut cmd = target.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::own_process_group(&mut cmd);

        let start_time = Instant::now();
        let mut child = cmd.spawn().map_err(|source| Error::JudgeLaunch {
            program: target.program().to_string_lossy().into_owned(),
            source,
        })?;
        let pid = child.id();

        // Write input to stdin, then close it so the program sees end-of-file
        let feeder = child.stdin.take().map(|mut stdin| {
            let input = input.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    // Programs may exit without reading all of their input
                    log::debug!("Could not write whole input: {e}");
                }
            })
        });
        let stdout = child
            .stdout
            .take()
            .map(|out| Capture::spawn(out, self.output_limit));
        let stderr = child
            .stderr
            .take()
            .map(|err| Capture::spawn(err, self.output_limit));

        let waited = tokio::select! {
            _ = cancel.cancelled() => Waited::Cancelled,
            res = tokio::time::timeout(timeout, child.wait()) => match res {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
        };
        let elapsed = start_time.elapsed();

        if let Some(feeder) = feeder {
            feeder.abort();
        }

        let status = match waited {
            Waited::Exited(status) => {
                // Anything the program left running in the background goes too
                process::kill_process_group(pid);
                Some(status?)
            }
            Waited::TimedOut => {
                log::debug!("`{target}` timed out after {}ms", elapsed.as_millis());
                process::terminate(&mut child).await;
                None
            }
            Waited::Cancelled => {
                log::debug!("`{target}` cancelled");
                process::terminate(&mut child).await;
                stdout.into_iter().chain(stderr).for_each(Capture::abort);
                return Ok(JudgeOutcome::Cancelled);
            }
        };

        let (stdout, stderr) = tokio::join!(capture::collect(stdout), capture::collect(stderr));
        let execution = Execution {
            stdout,
            stderr,
            status,
            elapsed,
            timed_out: status.is_none(),
        };

        Ok(JudgeOutcome::Finished(RunResult::classify(
            execution,
            expected_output,
        )))
    }
}
