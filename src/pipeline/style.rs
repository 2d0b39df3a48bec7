//! Style stage: vendor prefixing, minification, source maps.
//!
//! Entry stylesheets run through lightningcss against a fixed browser
//! floor: prefixes are added where the targets require them, rules are
//! minified, and a source map is emitted next to the output.

use std::fs;
use std::io;
use std::path::Path;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;

use super::{StageOutcome, TransformError, write_output};
use crate::config::Config;

/// Browser version encoding used by lightningcss: `major << 16`.
const fn browser(major: u32) -> Option<u32> {
    Some(major << 16)
}

/// Browser floor the emitted CSS must support.
fn targets() -> Targets {
    Targets {
        browsers: Some(Browsers {
            chrome: browser(50),
            edge: browser(14),
            firefox: browser(45),
            ios_saf: browser(10),
            opera: browser(40),
            safari: browser(10),
            ..Browsers::default()
        }),
        ..Targets::default()
    }
}

pub fn run(config: &Config) -> Result<StageOutcome, TransformError> {
    let stage = &config.style;
    let mut files = 0;

    for source in &stage.sources {
        files += compile(source, &config.root, &stage.dest)?;
    }

    Ok(StageOutcome { files })
}

/// Compile one entry stylesheet; returns the number of files written.
fn compile(source_path: &Path, root: &Path, dest: &Path) -> Result<usize, TransformError> {
    let name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            TransformError::read(
                source_path,
                io::Error::new(io::ErrorKind::InvalidInput, "entry has no file name"),
            )
        })?
        .to_string();

    let source = fs::read_to_string(source_path).map_err(|e| TransformError::read(source_path, e))?;

    // Map paths stay project-relative so repeated builds are stable
    let map_source = source_path
        .strip_prefix(root)
        .unwrap_or(source_path)
        .to_string_lossy()
        .replace('\\', "/");

    let targets = targets();
    let mut stylesheet = StyleSheet::parse(
        &source,
        ParserOptions {
            filename: map_source.clone(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| TransformError::stylesheet(source_path, e.to_string()))?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| TransformError::stylesheet(source_path, e.to_string()))?;

    let mut source_map = SourceMap::new("/");
    source_map.add_source(&map_source);
    source_map
        .set_source_content(0, &source)
        .map_err(|e| TransformError::source_map(source_path, e.to_string()))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: Some(&mut source_map),
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| TransformError::stylesheet(source_path, e.to_string()))?;

    let map_json = source_map
        .to_json(None)
        .map_err(|e| TransformError::source_map(source_path, e.to_string()))?;

    let map_name = format!("{name}.map");
    let mut code = output.code;
    code.push_str(&format!("\n/*# sourceMappingURL={map_name} */\n"));

    write_output(&dest.join(&name), code.as_bytes())?;
    write_output(&dest.join(&map_name), map_json.as_bytes())?;
    Ok(2)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnvSettings};
    use std::fs;

    fn test_config(root: &Path) -> Config {
        Config::resolve(
            root,
            EnvSettings {
                production: None,
                port: None,
                folder_build: Some("build".to_string()),
            },
        )
        .unwrap()
    }

    fn write_stylesheet(root: &Path, css: &str) {
        let dir = root.join("src/css");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("styles.css"), css).unwrap();
    }

    #[test]
    fn test_minified_output_and_map_reference() {
        let dir = tempfile::tempdir().unwrap();
        write_stylesheet(dir.path(), "a { color: #FFFFFF; }\n");
        let config = test_config(dir.path());

        let outcome = run(&config).unwrap();
        assert_eq!(outcome.files, 2);

        let css = fs::read_to_string(config.style.dest.join("styles.css")).unwrap();
        assert!(css.contains("a{color:#fff}"));
        assert!(css.contains("sourceMappingURL=styles.css.map"));

        let map = fs::read_to_string(config.style.dest.join("styles.css.map")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&map).unwrap();
        assert_eq!(parsed["sources"][0], "src/css/styles.css");
    }

    #[test]
    fn test_vendor_prefixes_added_for_targets() {
        let dir = tempfile::tempdir().unwrap();
        write_stylesheet(dir.path(), ".toolbar { user-select: none; }\n");
        let config = test_config(dir.path());

        run(&config).unwrap();
        let css = fs::read_to_string(config.style.dest.join("styles.css")).unwrap();
        assert!(css.contains("-webkit-user-select"));
        assert!(css.contains("user-select:none"));
    }

    #[test]
    fn test_malformed_stylesheet_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_stylesheet(dir.path(), "% { color: red; }\n");
        let config = test_config(dir.path());

        let err = run(&config).err().unwrap();
        assert!(matches!(err, TransformError::Stylesheet { .. }));
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        write_stylesheet(dir.path(), "body { margin: 0px; }\na { color: #FFFFFF; }\n");
        let config = test_config(dir.path());

        run(&config).unwrap();
        let first_css = fs::read(config.style.dest.join("styles.css")).unwrap();
        let first_map = fs::read(config.style.dest.join("styles.css.map")).unwrap();
        run(&config).unwrap();
        assert_eq!(fs::read(config.style.dest.join("styles.css")).unwrap(), first_css);
        assert_eq!(
            fs::read(config.style.dest.join("styles.css.map")).unwrap(),
            first_map
        );
    }
}
