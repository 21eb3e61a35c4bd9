//! Pipeline error kinds and their process exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error kinds surfaced by the build pipeline.
///
/// Each kind maps to a distinct process exit code so that callers (CI jobs,
/// deploy scripts) can tell a stale-asset signal apart from a real failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A template could not be parsed into bundle declarations.
    #[error("error parsing template {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    /// A referenced dependency is missing from disk, or the dependency
    /// graph contains a cycle.
    #[error("dependency error in {}: {missing}", .src.display())]
    Dependency { src: PathBuf, missing: String },

    /// An external compiler exited with a non-zero status.
    #[error("compile command {argv:?} failed:\n{stderr}")]
    Compile { argv: Vec<String>, stderr: String },

    /// One or more uploads failed after the upload queue drained.
    #[error("{} upload(s) failed: {}", .failures.len(), .failures.join("; "))]
    Upload { failures: Vec<String> },

    /// Dry-run only: compilation is pending. Not a failure of the pipeline
    /// itself, but reported through the exit code.
    #[error("assets need compilation")]
    NeedsCompilation,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The exit code reported for this error kind.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::NeedsCompilation => ExitCode::from(1),
            Self::Parse { .. } | Self::Dependency { .. } => ExitCode::from(2),
            Self::Compile { .. } => ExitCode::from(3),
            Self::Upload { .. } => ExitCode::from(4),
            Self::Other(_) => ExitCode::FAILURE,
        }
    }
}
