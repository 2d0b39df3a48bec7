//! Markup stage: include expansion, cleanup, formatting, minification.
//!
//! Entry templates are expanded recursively through `@@include("…")`
//! directives (paths resolve relative to the including file), stripped of
//! blank lines, reindented, and minified in production builds.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{StageOutcome, TransformError, write_output};
use crate::config::Config;

/// Include directive: `@@include("relative/path.html")`.
static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@@include\([ \t]*['"]([^'"]+)['"][ \t]*\)"#).unwrap());

/// Opening/closing/self-closing tag, for depth tracking. Comments and
/// doctype do not match (tag names start with a letter).
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)([^>]*?)(/?)>").unwrap());

/// Nesting limit for include expansion; only include cycles reach it.
const MAX_INCLUDE_DEPTH: usize = 64;

pub fn run(config: &Config) -> Result<StageOutcome, TransformError> {
    let stage = &config.markup;
    let mut files = 0;

    for source in &stage.sources {
        let document = compile(source, config.production)?;
        let name = source.file_name().ok_or_else(|| {
            TransformError::read(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "entry has no file name"),
            )
        })?;
        write_output(&stage.dest.join(name), &document)?;
        files += 1;
    }

    Ok(StageOutcome { files })
}

/// Run the full markup chain for one entry template.
fn compile(entry: &Path, production: bool) -> Result<Vec<u8>, TransformError> {
    let expanded = expand_includes(entry, 0)?;
    let cleaned = strip_blank_lines(&expanded);
    let formatted = format_document(&cleaned);
    Ok(if production {
        minify(&formatted)
    } else {
        formatted.into_bytes()
    })
}

// ============================================================================
// Include expansion
// ============================================================================

/// Recursively expand `@@include` directives.
///
/// The whole tree is expanded in memory before anything is written, so a
/// missing fragment can never leave partial output behind.
fn expand_includes(path: &Path, depth: usize) -> Result<String, TransformError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(TransformError::IncludeDepth {
            path: path.to_path_buf(),
        });
    }

    let source = fs::read_to_string(path).map_err(|e| TransformError::read(path, e))?;
    let base = path.parent().unwrap_or(Path::new(""));

    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in INCLUDE.captures_iter(&source) {
        let directive = caps.get(0).unwrap();
        let fragment = base.join(&caps[1]);
        if !fragment.is_file() {
            return Err(TransformError::missing_include(fragment, path));
        }
        out.push_str(&source[last..directive.start()]);
        out.push_str(&expand_includes(&fragment, depth + 1)?);
        last = directive.end();
    }
    out.push_str(&source[last..]);
    Ok(out)
}

// ============================================================================
// Cleanup and formatting
// ============================================================================

/// Drop empty and whitespace-only lines.
fn strip_blank_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        if !line.trim().is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Reindent the document by tag depth (two-space indent).
///
/// Void elements and self-closing tags do not open a level; a line that
/// starts with a closing tag is dedented before printing.
fn format_document(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth: usize = 0;

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut opens = 0usize;
        let mut closes = 0usize;
        for caps in TAG.captures_iter(trimmed) {
            let closing = !caps[1].is_empty();
            let self_closing = !caps[4].is_empty();
            if closing {
                closes += 1;
            } else if !self_closing && !is_void_element(&caps[2].to_ascii_lowercase()) {
                opens += 1;
            }
        }

        let indent = if trimmed.starts_with("</") {
            depth.saturating_sub(1)
        } else {
            depth
        };
        for _ in 0..indent {
            out.push_str("  ");
        }
        out.push_str(trimmed);
        out.push('\n');

        depth = (depth + opens).saturating_sub(closes);
    }

    out
}

/// Check if an HTML tag is a void element (no children, never closed).
fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

// ============================================================================
// Minification
// ============================================================================

/// Collapse whitespace and strip comments (production builds only).
fn minify(document: &str) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;
    minify_html::minify(document.as_bytes(), &cfg)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnvSettings};
    use std::fs;

    fn test_config(root: &Path, production: bool) -> Config {
        Config::resolve(
            root,
            EnvSettings {
                production: production.then(|| "1".to_string()),
                port: None,
                folder_build: Some("build".to_string()),
            },
        )
        .unwrap()
    }

    fn write_site(root: &Path, index: &str) {
        let html = root.join("src/html");
        fs::create_dir_all(&html).unwrap();
        fs::write(html.join("index.html"), index).unwrap();
    }

    #[test]
    fn test_expand_nested_includes() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("src/html");
        fs::create_dir_all(html.join("partials")).unwrap();
        fs::write(
            html.join("index.html"),
            "<body>\n@@include(\"partials/header.html\")\n</body>\n",
        )
        .unwrap();
        fs::write(
            html.join("partials/header.html"),
            "<header>@@include('nav.html')</header>\n",
        )
        .unwrap();
        fs::write(html.join("partials/nav.html"), "<nav>links</nav>").unwrap();

        let expanded = expand_includes(&html.join("index.html"), 0).unwrap();
        assert!(expanded.contains("<header>"));
        assert!(expanded.contains("<nav>links</nav>"));
        assert!(!expanded.contains("@@include"));
    }

    #[test]
    fn test_missing_include_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        write_site(dir.path(), "<body>@@include(\"partials/gone.html\")</body>\n");
        let config = test_config(dir.path(), false);

        let err = run(&config).err().unwrap();
        assert!(matches!(err, TransformError::MissingInclude { .. }));
        assert!(!config.markup.dest.join("index.html").exists());
    }

    #[test]
    fn test_include_cycle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("src/html");
        fs::create_dir_all(&html).unwrap();
        fs::write(html.join("a.html"), "@@include('b.html')").unwrap();
        fs::write(html.join("b.html"), "@@include('a.html')").unwrap();

        let err = expand_includes(&html.join("a.html"), 0).err().unwrap();
        assert!(matches!(err, TransformError::IncludeDepth { .. }));
    }

    #[test]
    fn test_strip_blank_lines() {
        let input = "<div>\n\n   \n<p>text</p>\n\n</div>\n";
        assert_eq!(strip_blank_lines(input), "<div>\n<p>text</p>\n</div>\n");
    }

    #[test]
    fn test_format_document_indents_by_depth() {
        let input = "<div>\n<p>text</p>\n</div>\n";
        assert_eq!(format_document(input), "<div>\n  <p>text</p>\n</div>\n");
    }

    #[test]
    fn test_format_document_void_elements_do_not_indent() {
        let input = "<div>\n<br>\n<img src=\"x.png\">\n<p>text</p>\n</div>\n";
        let formatted = format_document(input);
        assert_eq!(
            formatted,
            "<div>\n  <br>\n  <img src=\"x.png\">\n  <p>text</p>\n</div>\n"
        );
    }

    #[test]
    fn test_development_build_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        write_site(
            dir.path(),
            "<html>\n<body>\n<!-- banner -->\n<p>hello</p>\n</body>\n</html>\n",
        );
        let config = test_config(dir.path(), false);

        run(&config).unwrap();
        let output = fs::read_to_string(config.markup.dest.join("index.html")).unwrap();
        assert!(output.contains("<!-- banner -->"));
        assert!(output.contains("  <p>hello</p>"));
    }

    #[test]
    fn test_production_build_minifies() {
        let dir = tempfile::tempdir().unwrap();
        write_site(
            dir.path(),
            "<html>\n<body>\n<!-- banner -->\n<p>hello   world</p>\n</body>\n</html>\n",
        );
        let config = test_config(dir.path(), true);

        run(&config).unwrap();
        let output = fs::read_to_string(config.markup.dest.join("index.html")).unwrap();
        assert!(!output.contains("<!--"));
        assert!(!output.contains("  "));
        assert!(output.contains("hello world"));
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        write_site(dir.path(), "<html>\n<body>\n<p>stable</p>\n</body>\n</html>\n");
        let config = test_config(dir.path(), true);

        run(&config).unwrap();
        let first = fs::read(config.markup.dest.join("index.html")).unwrap();
        run(&config).unwrap();
        let second = fs::read(config.markup.dest.join("index.html")).unwrap();
        assert_eq!(first, second);
    }
}
