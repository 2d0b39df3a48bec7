//! Sitewright - a static site build pipeline with a live-reload dev server.

#![allow(dead_code)]

mod cli;
mod config;
mod logger;
mod pipeline;
mod serve;
mod state;
mod utils;
mod watch;

use std::thread;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};

use cli::Cli;
use config::Config;
use serve::reload::Reloader;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    state::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    // A missing .env is fine; the process environment stays authoritative
    let _ = dotenvy::dotenv();

    let config: &'static Config = Box::leak(Box::new(Config::from_env()?));
    run_pipeline(config)
}

/// Run the four stages once, in order, then serve and watch until terminated.
fn run_pipeline(config: &'static Config) -> Result<()> {
    let reloader = Reloader::new();

    if config.production {
        log!("build"; "production mode enabled");
    }

    for stage in &pipeline::STAGES {
        let outcome = stage
            .execute(config, &reloader)
            .with_context(|| format!("{} stage failed", stage.category))?;
        log!("build"; "{}: {} file(s) written", stage.category, outcome.files);
    }

    let bound = serve::bind(config)?;
    let reload_port = reloader.listen(serve::DEFAULT_RELOAD_PORT)?;
    debug!("reload"; "ws://localhost:{}", reload_port);

    let watch_reloader = reloader.clone();
    thread::spawn(move || {
        if let Err(e) = watch::run(config, watch_reloader) {
            log!("watch"; "watcher stopped: {}", e);
        }
    });

    bound.run(config, reload_port)
}
