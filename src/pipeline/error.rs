//! Stage failure taxonomy.
//!
//! Stages never recover: the first error aborts the run and travels upward
//! unmodified. During the initial build that halts startup; during a
//! watch-triggered re-run it is displayed and the watcher keeps going.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced inside a stage's transformation chain.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("include not found: {} (referenced from {})", .fragment.display(), .referrer.display())]
    MissingInclude { fragment: PathBuf, referrer: PathBuf },

    #[error("include nesting too deep at {} (include cycle?)", .path.display())]
    IncludeDepth { path: PathBuf },

    #[error("stylesheet error in {}: {message}", .path.display())]
    Stylesheet { path: PathBuf, message: String },

    #[error("script error in {}: {message}", .path.display())]
    Script { path: PathBuf, message: String },

    #[error("unresolved module `{specifier}` imported from {}", .referrer.display())]
    UnresolvedModule { specifier: String, referrer: PathBuf },

    #[error("source map error for {}: {message}", .path.display())]
    SourceMap { path: PathBuf, message: String },
}

impl TransformError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing_include(fragment: impl Into<PathBuf>, referrer: &Path) -> Self {
        Self::MissingInclude {
            fragment: fragment.into(),
            referrer: referrer.to_path_buf(),
        }
    }

    pub(crate) fn stylesheet(path: &Path, message: impl Into<String>) -> Self {
        Self::Stylesheet {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn script(path: &Path, message: impl Into<String>) -> Self {
        Self::Script {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn unresolved_module(specifier: impl Into<String>, referrer: &Path) -> Self {
        Self::UnresolvedModule {
            specifier: specifier.into(),
            referrer: referrer.to_path_buf(),
        }
    }

    pub(crate) fn source_map(path: &Path, message: impl Into<String>) -> Self {
        Self::SourceMap {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}
