//! Asset stage: recursive copy of the asset tree.
//!
//! No transformation: every file under the asset source root is copied to
//! the destination at the same relative path. The walk skips hidden files,
//! matching the source-selection semantics of the other stages' globs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use rayon::prelude::*;

use super::{StageOutcome, TransformError};
use crate::config::Config;

pub fn run(config: &Config) -> Result<StageOutcome, TransformError> {
    let stage = &config.assets;
    let Some(source_root) = stage.sources.first() else {
        return Ok(StageOutcome { files: 0 });
    };

    if !source_root.is_dir() {
        return Err(TransformError::read(
            source_root,
            io::Error::new(io::ErrorKind::NotFound, "asset source root not found"),
        ));
    }

    let files = collect_files(source_root)?;
    files
        .par_iter()
        .try_for_each(|path| copy_one(path, source_root, &stage.dest))?;

    Ok(StageOutcome { files: files.len() })
}

/// Collect all regular files under the root (sorted for determinism).
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, TransformError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| TransformError::read(root, io::Error::other(e)))?;
        if entry.file_type().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy a single file, preserving its path relative to the source root.
fn copy_one(path: &Path, source_root: &Path, dest: &Path) -> Result<(), TransformError> {
    let relative = path.strip_prefix(source_root).map_err(|_| {
        TransformError::read(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path escapes asset root"),
        )
    })?;
    let target = dest.join(relative);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| TransformError::write(parent, e))?;
    }
    fs::copy(path, &target).map_err(|e| TransformError::write(&target, e))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
