use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::language::{Language, LanguageDescriptor};

/// Where the compiled output of a source file lives.
///
/// For Java this is a class-file glob (`Main*.class`) rather than a single
/// file, since `javac` may emit nested classes next to the main one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath(PathBuf);

impl ArtifactPath {
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Directory the artifact is written to
    pub fn dir(&self) -> &Path {
        match self.0.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl AsRef<Path> for ArtifactPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Compute the artifact location of `source_path`.
///
/// Interpreted languages run the source itself. Otherwise the artifact is
/// named after the source stem and placed in `save_location` when that is
/// set and non-empty, next to the source otherwise.
pub fn locate(
    source_path: &Path,
    descriptor: &LanguageDescriptor,
    save_location: Option<&Path>,
) -> Result<ArtifactPath> {
    if descriptor.skip_compile {
        return Ok(ArtifactPath(source_path.to_path_buf()));
    }

    let stem = source_path
        .file_stem()
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| Error::InvalidSourcePath(source_path.to_path_buf()))?;

    let mut file_name = OsString::from(stem);
    file_name.push(match descriptor.language {
        Language::Java => "*.class",
        _ => ".exe",
    });

    let dir = match save_location.filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => source_path.parent().unwrap_or(Path::new("")),
    };

    Ok(ArtifactPath(dir.join(file_name)))
}
