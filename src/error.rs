use std::io;
use std::path::PathBuf;

use crate::cases::CaseId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported language for `{}`", .0.display())]
    UnsupportedLanguage(PathBuf),

    #[error("invalid source path `{}`", .0.display())]
    InvalidSourcePath(PathBuf),

    #[error("failed to save pending edits to `{}`: {source}", .path.display())]
    SaveSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The compiler executable could not be started at all.
    #[error(
        "failed to launch compiler `{executable}`: {source}\n\nIs `{executable}` installed? Check the compiler configured for this language."
    )]
    CompilerLaunch {
        executable: String,
        #[source]
        source: io::Error,
    },

    /// The runtime executable of a judged program could not be started.
    #[error("failed to launch `{program}`: {source}")]
    JudgeLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("no test case with id {0}")]
    CaseNotFound(CaseId),

    #[error("nothing to run: the source has not been compiled successfully")]
    NotCompiled,

    #[error(transparent)]
    Io(#[from] io::Error),
}
