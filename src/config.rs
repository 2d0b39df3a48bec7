//! Environment-derived build configuration.
//!
//! The configuration is resolved once at process start and is read-only for
//! the rest of the run. Every component receives it by reference; nothing
//! reads the environment after this point.
//!
//! | Variable       | Effect                                         |
//! |----------------|------------------------------------------------|
//! | `PRODUCTION`   | truthy enables markup minification             |
//! | `PORT`         | dev server listen port (default 8080)          |
//! | `FOLDER_BUILD` | output directory name, relative to the root    |

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Dev server port used when `PORT` is unset.
const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// Category
// ============================================================================

/// One of the four source→destination transformation pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Markup,
    Style,
    Script,
    Assets,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Markup,
        Category::Style,
        Category::Script,
        Category::Assets,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Markup => "markup",
            Category::Style => "style",
            Category::Script => "script",
            Category::Assets => "assets",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-category source selection and destination.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Entry paths the stage reads. The asset stage treats its single entry
    /// as a directory root; the others read each entry as a file.
    pub sources: Vec<PathBuf>,
    /// Root-relative glob patterns whose filesystem events re-run the stage.
    pub watch: Vec<String>,
    /// Directory the stage writes into.
    pub dest: PathBuf,
}

/// Resolved build configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root (canonicalized working directory).
    pub root: PathBuf,
    /// Whether production transforms (minification) are enabled.
    pub production: bool,
    /// Dev server listen port.
    pub port: u16,
    /// Output root directory; markup/style/script write here, assets below it.
    pub output_root: PathBuf,

    pub markup: StageConfig,
    pub style: StageConfig,
    pub script: StageConfig,
    pub assets: StageConfig,
}

/// Raw environment values, captured before resolution.
#[derive(Debug, Default, Clone)]
pub struct EnvSettings {
    pub production: Option<String>,
    pub port: Option<String>,
    pub folder_build: Option<String>,
}

impl EnvSettings {
    pub fn capture() -> Self {
        Self {
            production: std::env::var("PRODUCTION").ok(),
            port: std::env::var("PORT").ok(),
            folder_build: std::env::var("FOLDER_BUILD").ok(),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FOLDER_BUILD is not set; set it to the output directory name")]
    MissingOutputFolder,

    #[error("PORT is not a valid port number: `{value}`")]
    InvalidPort {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("failed to resolve the working directory")]
    WorkingDir(#[source] std::io::Error),
}

impl Config {
    /// Resolve configuration from the process environment and working
    /// directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::current_dir().map_err(ConfigError::WorkingDir)?;
        Self::resolve(&root, EnvSettings::capture())
    }

    /// Resolve configuration against an explicit project root.
    pub fn resolve(root: &Path, env: EnvSettings) -> Result<Self, ConfigError> {
        // Canonicalize so watcher event paths relativize cleanly
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let production = env.production.as_deref().is_some_and(is_truthy);

        let port = match env.port.as_deref() {
            None | Some("") => DEFAULT_PORT,
            Some(raw) => raw.parse().map_err(|source| ConfigError::InvalidPort {
                value: raw.to_string(),
                source,
            })?,
        };

        let folder = env
            .folder_build
            .filter(|f| !f.is_empty())
            .ok_or(ConfigError::MissingOutputFolder)?;
        let output_root = root.join(&folder);

        Ok(Self {
            markup: StageConfig {
                sources: vec![root.join("src/html/index.html")],
                watch: vec!["src/html/**/*.html".into()],
                dest: output_root.clone(),
            },
            style: StageConfig {
                sources: vec![root.join("src/css/styles.css")],
                watch: vec!["src/css/styles.css".into()],
                dest: output_root.clone(),
            },
            script: StageConfig {
                sources: vec![root.join("src/js/main.js")],
                watch: vec!["src/js/**/*.js".into()],
                dest: output_root.clone(),
            },
            assets: StageConfig {
                sources: vec![root.join("src/assets")],
                watch: vec!["src/assets/**/*".into()],
                dest: output_root.join("assets"),
            },
            root,
            production,
            port,
            output_root,
        })
    }

    /// The stage configuration for a category.
    pub fn stage(&self, category: Category) -> &StageConfig {
        match category {
            Category::Markup => &self.markup,
            Category::Style => &self.style,
            Category::Script => &self.script,
            Category::Assets => &self.assets,
        }
    }
}

/// Truthy parse for `PRODUCTION`: set, non-empty, and not `0`/`false`.
fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn env(production: Option<&str>, port: Option<&str>, folder: Option<&str>) -> EnvSettings {
        EnvSettings {
            production: production.map(str::to_string),
            port: port.map(str::to_string),
            folder_build: folder.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path(), env(None, None, Some("build"))).unwrap();

        assert!(!config.production);
        assert_eq!(config.port, 8080);
        assert_eq!(config.output_root, config.root.join("build"));
        assert_eq!(config.markup.dest, config.output_root);
        assert_eq!(config.assets.dest, config.output_root.join("assets"));
    }

    #[test]
    fn test_production_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("FALSE"));
    }

    #[test]
    fn test_invalid_port() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::resolve(dir.path(), env(None, Some("eight"), Some("build")))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));
    }

    #[test]
    fn test_missing_output_folder() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::resolve(dir.path(), env(None, None, None)).err().unwrap();
        assert!(matches!(err, ConfigError::MissingOutputFolder));

        let err = Config::resolve(dir.path(), env(None, None, Some("")))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingOutputFolder));
    }

    #[test]
    fn test_destinations_fixed_at_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path(), env(Some("1"), Some("9090"), Some("dist"))).unwrap();

        assert!(config.production);
        assert_eq!(config.port, 9090);
        for category in Category::ALL {
            let stage = config.stage(category);
            assert!(stage.dest.starts_with(&config.output_root));
            assert!(!stage.sources.is_empty());
            assert!(!stage.watch.is_empty());
        }
    }
}
