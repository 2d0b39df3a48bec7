//! Watch orchestrator: filesystem events to stage re-runs.
//!
//! One recursive watcher over `<root>/src`; event paths are relativized and
//! matched against every category's compiled watch globs. Each matching
//! event triggers one full re-run of the owning stage on its own thread.
//! No debouncing, no batching, and no serialization of overlapping runs of
//! the same category.

use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use crossbeam::channel;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::config::{Category, Config};
use crate::pipeline;
use crate::serve::reload::Reloader;
use crate::{debug, log, logger};

/// Compiled watch patterns for one category.
pub struct WatchSet {
    category: Category,
    globs: GlobSet,
}

/// Compile every category's watch patterns, in stage order.
pub fn build_watch_sets(config: &Config) -> Result<Vec<WatchSet>> {
    pipeline::STAGES
        .iter()
        .map(|stage| {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.stage(stage.category).watch {
                let glob = Glob::new(pattern)
                    .with_context(|| format!("invalid watch pattern: {pattern}"))?;
                builder.add(glob);
            }
            Ok(WatchSet {
                category: stage.category,
                globs: builder.build()?,
            })
        })
        .collect()
}

/// Categories whose watch patterns match the given root-relative path.
pub fn matching_categories(sets: &[WatchSet], relative: &str) -> Vec<Category> {
    sets.iter()
        .filter(|set| set.globs.is_match(relative))
        .map(|set| set.category)
        .collect()
}

/// Run the watcher until process termination.
pub fn run(config: &'static Config, reloader: Reloader) -> Result<()> {
    let sets = build_watch_sets(config)?;

    let (tx, rx) = channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let _ = tx.send(result);
    })?;

    let watch_root = config.root.join("src");
    watcher
        .watch(&watch_root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", watch_root.display()))?;
    log!("watch"; "watching {} for changes", watch_root.display());

    while let Ok(result) = rx.recv() {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                log!("watch"; "notify error: {}", e);
                continue;
            }
        };
        if !is_change(&event.kind) {
            continue;
        }

        for category in event_categories(&event, &sets, &config.root) {
            trigger(category, config, reloader.clone());
        }
    }
    Ok(())
}

/// Create/modify/remove re-run stages; access chatter does not.
fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Unique categories matched by any of the event's paths, in stage order.
fn event_categories(event: &Event, sets: &[WatchSet], root: &Path) -> Vec<Category> {
    let mut matched = Vec::new();
    for path in &event.paths {
        let Some(relative) = relative_str(root, path) else {
            continue;
        };
        for category in matching_categories(sets, &relative) {
            if !matched.contains(&category) {
                matched.push(category);
            }
        }
    }
    matched
}

/// One full stage re-run on its own thread.
///
/// Overlapping runs of the same category are not serialized; the categories
/// write disjoint output subpaths and the last write wins.
fn trigger(category: Category, config: &'static Config, reloader: Reloader) {
    debug!("watch"; "{} change detected", category);
    thread::spawn(move || {
        let stage = pipeline::stage_for(category);
        match stage.execute(config, &reloader) {
            Ok(outcome) => {
                logger::status_success(&format!("{}: rebuilt {} file(s)", category, outcome.files));
            }
            Err(e) => {
                logger::status_error(&format!("{} rebuild failed", category), &e.to_string());
            }
        }
    });
}

/// Convert a path into a string relative to `root`, with forward slashes.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSettings;
    use std::path::PathBuf;

    fn test_config() -> Config {
        let dir = tempfile::tempdir().unwrap();
        Config::resolve(
            dir.path(),
            EnvSettings {
                production: None,
                port: None,
                folder_build: Some("build".to_string()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_style_pattern_routes_only_to_style() {
        let config = test_config();
        let sets = build_watch_sets(&config).unwrap();

        let matched = matching_categories(&sets, "src/css/styles.css");
        assert_eq!(matched, vec![Category::Style]);
    }

    #[test]
    fn test_unwatched_stylesheet_routes_nowhere() {
        let config = test_config();
        let sets = build_watch_sets(&config).unwrap();

        // Only the entry stylesheet is watched
        assert!(matching_categories(&sets, "src/css/other.css").is_empty());
    }

    #[test]
    fn test_category_routing() {
        let config = test_config();
        let sets = build_watch_sets(&config).unwrap();

        assert_eq!(
            matching_categories(&sets, "src/html/index.html"),
            vec![Category::Markup]
        );
        assert_eq!(
            matching_categories(&sets, "src/html/partials/nav.html"),
            vec![Category::Markup]
        );
        assert_eq!(
            matching_categories(&sets, "src/js/app/util.js"),
            vec![Category::Script]
        );
        assert_eq!(
            matching_categories(&sets, "src/assets/img/logo.png"),
            vec![Category::Assets]
        );
        assert!(matching_categories(&sets, "src/html/notes.txt").is_empty());
    }

    #[test]
    fn test_event_categories_dedup() {
        let config = test_config();
        let sets = build_watch_sets(&config).unwrap();

        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Any,
            )),
            paths: vec![
                config.root.join("src/html/index.html"),
                config.root.join("src/html/partials/nav.html"),
            ],
            attrs: Default::default(),
        };

        let matched = event_categories(&event, &sets, &config.root);
        assert_eq!(matched, vec![Category::Markup]);
    }

    #[test]
    fn test_relative_str() {
        let root = PathBuf::from("/project");
        assert_eq!(
            relative_str(&root, &root.join("src/css/styles.css")).unwrap(),
            "src/css/styles.css"
        );
        assert!(relative_str(&root, Path::new("/elsewhere/file")).is_none());
    }
}
