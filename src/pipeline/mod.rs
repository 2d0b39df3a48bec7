//! The four build stages and their dispatch table.
//!
//! Each stage is a plain function from configuration to outcome. The
//! [`STAGES`] table binds every category to its runner and to its
//! reload-notification policy, so both the initial sequential build and the
//! watch orchestrator dispatch over the same data instead of scattered
//! callbacks.

pub mod assets;
pub mod error;
pub mod markup;
pub mod script;
pub mod style;

use std::fs;
use std::path::Path;

pub use error::TransformError;

use crate::config::{Category, Config};
use crate::serve::reload::Reloader;

// ============================================================================
// Types
// ============================================================================

/// Result of a successful stage run.
#[derive(Debug, Clone, Copy)]
pub struct StageOutcome {
    /// Number of files written to the destination.
    pub files: usize,
}

/// A stage registration: category, reload policy, runner.
pub struct StageSpec {
    pub category: Category,
    /// Whether connected dev-server clients are told to reload after a
    /// successful run. The script stage leaves this off.
    pub notify_clients: bool,
    run: fn(&Config) -> Result<StageOutcome, TransformError>,
}

/// All stages, in initial-build order.
pub const STAGES: [StageSpec; 4] = [
    StageSpec {
        category: Category::Markup,
        notify_clients: true,
        run: markup::run,
    },
    StageSpec {
        category: Category::Style,
        notify_clients: true,
        run: style::run,
    },
    StageSpec {
        category: Category::Script,
        notify_clients: false,
        run: script::run,
    },
    StageSpec {
        category: Category::Assets,
        notify_clients: true,
        run: assets::run,
    },
];

impl StageSpec {
    /// Run the stage; on success, apply the reload-notification policy.
    pub fn execute(
        &self,
        config: &Config,
        reloader: &Reloader,
    ) -> Result<StageOutcome, TransformError> {
        let outcome = (self.run)(config)?;
        if self.notify_clients {
            reloader.notify_reload(self.category.as_str());
        }
        Ok(outcome)
    }
}

/// Look up the registration for a category.
pub fn stage_for(category: Category) -> &'static StageSpec {
    STAGES
        .iter()
        .find(|s| s.category == category)
        .expect("every category is registered in STAGES")
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Write a finished artifact, creating parent directories as needed.
pub(crate) fn write_output(path: &Path, bytes: &[u8]) -> Result<(), TransformError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TransformError::write(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| TransformError::write(path, e))
}

// ============================================================================
// Tests
// ============================================================================
