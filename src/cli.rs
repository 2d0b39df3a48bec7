//! Command-line interface definitions.

use clap::{ColorChoice, Parser};

/// Sitewright static site build pipeline CLI.
///
/// A plain invocation compiles markup, styles, scripts and assets into the
/// output directory, then serves it with live reload while watching `src/`.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose output for debugging
    #[arg(long)]
    pub verbose: bool,
}
