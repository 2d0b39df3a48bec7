//! Script stage: module graph resolution and bundling.
//!
//! From the single entry file the module graph is walked depth-first.
//! Local modules are syntax-checked with the oxc parser and rewritten from
//! ESM statements to CommonJS module functions; modules resolved out of
//! `node_modules` are included verbatim, excluded from checking and
//! rewriting. The graph is emitted as one self-executing bundle with a
//! small require loader, minified in production builds.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use oxc::allocator::Allocator;
use oxc::parser::Parser;
use oxc::span::SourceType;
use regex::Regex;

use super::{StageOutcome, TransformError, write_output};
use crate::config::Config;

/// Output bundle file name.
const BUNDLE_NAME: &str = "bundle.js";

// Statement forms handled by the module-format rewrite. Line-oriented:
// one import/export statement per line, as the source tree writes them.
static IMPORT_NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[ \t]*import[ \t]+\*[ \t]+as[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)[ \t]+from[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#,
    )
    .unwrap()
});
static IMPORT_DEFAULT_NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[ \t]*import[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)[ \t]*,[ \t]*\{([^}]*)\}[ \t]*from[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#,
    )
    .unwrap()
});
static IMPORT_NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[ \t]*import[ \t]*\{([^}]*)\}[ \t]*from[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#)
        .unwrap()
});
static IMPORT_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[ \t]*import[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)[ \t]+from[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#,
    )
    .unwrap()
});
static IMPORT_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[ \t]*import[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#).unwrap());
static EXPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[ \t]*export[ \t]+\{([^}]*)\}[ \t]*from[ \t]+['"]([^'"]+)['"][ \t]*;?[ \t]*$"#,
    )
    .unwrap()
});
static EXPORT_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*export[ \t]+\{([^}]*)\}[ \t]*;?[ \t]*$").unwrap());
static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[ \t]*export[ \t]+(?:const|let|var|async[ \t]+function|function|class)[ \t]+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .unwrap()
});
static EXPORT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)export[ \t]+").unwrap());
static EXPORT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*export[ \t]+default[ \t]+").unwrap());

/// One bundled module: project-relative id plus rewritten body.
struct Module {
    id: String,
    body: String,
}

pub fn run(config: &Config) -> Result<StageOutcome, TransformError> {
    let stage = &config.script;
    let Some(entry) = stage.sources.first() else {
        return Ok(StageOutcome { files: 0 });
    };

    let mut bundle = bundle(entry, &config.root)?;
    if config.production {
        bundle = minify(&bundle, entry)?;
    }

    write_output(&stage.dest.join(BUNDLE_NAME), bundle.as_bytes())?;
    Ok(StageOutcome { files: 1 })
}

// ============================================================================
// Graph walk
// ============================================================================

/// Resolve the module graph from `entry` and render the bundle.
fn bundle(entry: &Path, root: &Path) -> Result<String, TransformError> {
    let mut modules = Vec::new();
    let mut seen = HashSet::new();
    load_module(entry, root, &mut modules, &mut seen)?;

    let entry_id = module_id(entry, root);
    Ok(render(&modules, &entry_id))
}

/// Load one module and, depth-first, everything it imports.
fn load_module(
    path: &Path,
    root: &Path,
    modules: &mut Vec<Module>,
    seen: &mut HashSet<String>,
) -> Result<(), TransformError> {
    let id = module_id(path, root);
    if !seen.insert(id.clone()) {
        return Ok(());
    }

    let source = fs::read_to_string(path).map_err(|e| TransformError::read(path, e))?;

    if is_third_party(&id) {
        modules.push(Module { id, body: source });
        return Ok(());
    }

    check_syntax(path, &source)?;
    let (body, dependencies) = to_commonjs(&source, path, root)?;
    modules.push(Module { id, body });

    for dependency in dependencies {
        load_module(&dependency, root, modules, seen)?;
    }
    Ok(())
}

/// Project-relative module id with forward slashes.
fn module_id(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn is_third_party(id: &str) -> bool {
    id.starts_with("node_modules/") || id.contains("/node_modules/")
}

/// Resolve an import specifier against the importing file.
///
/// Relative specifiers try the literal path, `.js` completion, then a
/// directory `index.js`. Bare specifiers look under `node_modules`.
fn resolve_specifier(
    specifier: &str,
    importer: &Path,
    root: &Path,
) -> Result<PathBuf, TransformError> {
    let candidates: Vec<PathBuf> = if specifier.starts_with("./") || specifier.starts_with("../") {
        let base = importer.parent().unwrap_or(root);
        vec![
            base.join(specifier),
            base.join(format!("{specifier}.js")),
            base.join(specifier).join("index.js"),
        ]
    } else {
        let packages = root.join("node_modules");
        vec![
            packages.join(specifier).join("index.js"),
            packages.join(format!("{specifier}.js")),
        ]
    };

    for candidate in candidates {
        if candidate.is_file() {
            // Canonical form keeps `..` segments out of module ids
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }
    Err(TransformError::unresolved_module(specifier, importer))
}

/// Parse a local module, aborting the stage on the first syntax error.
fn check_syntax(path: &Path, source: &str) -> Result<(), TransformError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(TransformError::script(path, error.to_string()));
    }
    Ok(())
}

// ============================================================================
// Module format rewrite (ESM -> CommonJS)
// ============================================================================

/// Rewrite ESM import/export statements into CommonJS, resolving every
/// imported specifier. Returns the rewritten body and the resolved
/// dependency paths in first-appearance order.
fn to_commonjs(
    source: &str,
    path: &Path,
    root: &Path,
) -> Result<(String, Vec<PathBuf>), TransformError> {
    let mut body: Vec<String> = Vec::new();
    let mut exported: Vec<(String, String)> = Vec::new();
    let mut dependencies: Vec<PathBuf> = Vec::new();
    let mut has_default = false;
    let mut needs_interop = false;
    let mut temp = 0usize;

    let require = |specifier: &str,
                   dependencies: &mut Vec<PathBuf>|
     -> Result<String, TransformError> {
        let resolved = resolve_specifier(specifier, path, root)?;
        let id = module_id(&resolved, root);
        if !dependencies.contains(&resolved) {
            dependencies.push(resolved);
        }
        Ok(format!("require(\"{id}\")"))
    };

    for line in source.lines() {
        if let Some(caps) = IMPORT_NAMESPACE.captures(line) {
            let call = require(&caps[2], &mut dependencies)?;
            body.push(format!("var {} = {};", &caps[1], call));
        } else if let Some(caps) = IMPORT_DEFAULT_NAMED.captures(line) {
            needs_interop = true;
            let call = require(&caps[3], &mut dependencies)?;
            let slot = format!("__module{temp}");
            temp += 1;
            body.push(format!("var {slot} = {call};"));
            body.push(format!("var {} = __interop({slot});", &caps[1]));
            body.push(format!("var {{ {} }} = {slot};", named_bindings(&caps[2])));
        } else if let Some(caps) = IMPORT_NAMED.captures(line) {
            let call = require(&caps[2], &mut dependencies)?;
            body.push(format!("var {{ {} }} = {};", named_bindings(&caps[1]), call));
        } else if let Some(caps) = IMPORT_DEFAULT.captures(line) {
            needs_interop = true;
            let call = require(&caps[2], &mut dependencies)?;
            body.push(format!("var {} = __interop({});", &caps[1], call));
        } else if let Some(caps) = IMPORT_BARE.captures(line) {
            let call = require(&caps[1], &mut dependencies)?;
            body.push(format!("{call};"));
        } else if let Some(caps) = EXPORT_FROM.captures(line) {
            let call = require(&caps[2], &mut dependencies)?;
            let slot = format!("__module{temp}");
            temp += 1;
            body.push(format!("var {slot} = {call};"));
            for (local, alias) in export_pairs(&caps[1]) {
                exported.push((alias, format!("{slot}.{local}")));
            }
        } else if let Some(caps) = EXPORT_LIST.captures(line) {
            for (local, alias) in export_pairs(&caps[1]) {
                exported.push((alias, local));
            }
        } else if EXPORT_DEFAULT.is_match(line) {
            has_default = true;
            body.push(EXPORT_DEFAULT.replace(line, "exports.default = ").into_owned());
        } else if let Some(caps) = EXPORT_DECL.captures(line) {
            let name = caps[1].to_string();
            body.push(EXPORT_PREFIX.replace(line, "$1").into_owned());
            exported.push((name.clone(), name));
        } else {
            body.push(line.to_string());
        }
    }

    if needs_interop {
        body.insert(
            0,
            "function __interop(m) { return m && m.__esModule ? m.default : m; }".to_string(),
        );
    }
    if has_default || !exported.is_empty() {
        body.insert(0, "exports.__esModule = true;".to_string());
    }
    for (name, expression) in &exported {
        body.push(format!("exports.{name} = {expression};"));
    }

    Ok((body.join("\n"), dependencies))
}

/// `a, b as c` -> `a, b: c` (destructuring form).
fn named_bindings(list: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(" as ") {
            Some((original, alias)) => format!("{}: {}", original.trim(), alias.trim()),
            None => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `a, b as c` -> `[("a", "a"), ("b", "c")]` (local name, exported name).
fn export_pairs(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(" as ") {
            Some((local, alias)) => (local.trim().to_string(), alias.trim().to_string()),
            None => (part.to_string(), part.to_string()),
        })
        .collect()
}

// ============================================================================
// Bundle rendering
// ============================================================================

/// Emit the loader prologue plus one module function per graph node.
fn render(modules: &[Module], entry_id: &str) -> String {
    let mut out = String::new();
    out.push_str("(function (modules, entry) {\n");
    out.push_str("  var cache = {};\n");
    out.push_str("  function require(id) {\n");
    out.push_str("    if (cache[id]) return cache[id].exports;\n");
    out.push_str("    var module = (cache[id] = { exports: {} });\n");
    out.push_str("    modules[id](module, module.exports, require);\n");
    out.push_str("    return module.exports;\n");
    out.push_str("  }\n");
    out.push_str("  require(entry);\n");
    out.push_str("})({\n");

    for (index, module) in modules.iter().enumerate() {
        out.push_str(&format!(
            "\"{}\": function (module, exports, require) {{\n",
            module.id
        ));
        out.push_str(&module.body);
        if !module.body.ends_with('\n') {
            out.push('\n');
        }
        out.push('}');
        out.push_str(if index + 1 < modules.len() { ",\n" } else { "\n" });
    }

    out.push_str(&format!("}}, \"{entry_id}\");\n"));
    out
}

// ============================================================================
// Minification (production)
// ============================================================================

/// Minify the finished bundle.
fn minify(source: &str, entry: &Path) -> Result<String, TransformError> {
    use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
    use oxc::mangler::MangleOptions;
    use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(TransformError::script(entry, error.to_string()));
    }

    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;
    Ok(code)
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

    fn write_module(root: &Path, relative: &str, source: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }

    #[test]
    fn test_bundle_contains_both_modules() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/main.js",
            "import { greet } from \"./lib.js\";\ngreet(\"world\");\n",
        );
        write_module(
            dir.path(),
            "src/js/lib.js",
            "export function greet(name) {\n  console.log(\"hi \" + name);\n}\n",
        );
        let config = test_config(dir.path());

        let outcome = run(&config).unwrap();
        assert_eq!(outcome.files, 1);

        let bundle = fs::read_to_string(config.script.dest.join("bundle.js")).unwrap();
        assert!(bundle.contains("src/js/main.js"));
        assert!(bundle.contains("src/js/lib.js"));
        assert!(bundle.contains("function greet"));
        assert!(bundle.contains("require(\"src/js/lib.js\")"));
        assert!(!bundle.contains("import {"));
    }

    #[test]
    fn test_unresolved_module_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/main.js",
            "import { gone } from \"./missing.js\";\n",
        );
        let config = test_config(dir.path());

        let err = run(&config).err().unwrap();
        assert!(matches!(err, TransformError::UnresolvedModule { .. }));
    }

    #[test]
    fn test_syntax_error_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "src/js/main.js", "function (\n");
        let config = test_config(dir.path());

        let err = run(&config).err().unwrap();
        assert!(matches!(err, TransformError::Script { .. }));
    }

    #[test]
    fn test_third_party_module_included_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/main.js",
            "import pad from \"leftpad\";\npad(\"x\", 3);\n",
        );
        write_module(
            dir.path(),
            "node_modules/leftpad/index.js",
            "module.exports = function (s, n) { while (s.length < n) s = \" \" + s; return s; };\n",
        );
        let config = test_config(dir.path());

        run(&config).unwrap();
        let bundle = fs::read_to_string(config.script.dest.join("bundle.js")).unwrap();
        assert!(bundle.contains("node_modules/leftpad/index.js"));
        assert!(bundle.contains("while (s.length < n)"));
    }

    #[test]
    fn test_default_import_uses_interop() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/main.js",
            "import config from \"./config.js\";\nconsole.log(config.name);\n",
        );
        write_module(
            dir.path(),
            "src/js/config.js",
            "export default { name: \"demo\" };\n",
        );
        let config = test_config(dir.path());

        run(&config).unwrap();
        let bundle = fs::read_to_string(config.script.dest.join("bundle.js")).unwrap();
        assert!(bundle.contains("__interop"));
        assert!(bundle.contains("exports.default ="));
        assert!(bundle.contains("exports.__esModule = true;"));
    }

    #[test]
    fn test_named_bindings_rewrite() {
        assert_eq!(named_bindings("a, b as c"), "a, b: c");
        assert_eq!(named_bindings(" greet "), "greet");
    }

    #[test]
    fn test_export_pairs() {
        assert_eq!(
            export_pairs("a, b as c"),
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn test_export_forms_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/lib.js",
            "export const limit = 3;\nexport function run() {}\nconst hidden = 1;\nexport { hidden as shown };\n",
        );
        let root = dir.path().canonicalize().unwrap();

        let source = fs::read_to_string(root.join("src/js/lib.js")).unwrap();
        let (body, dependencies) =
            to_commonjs(&source, &root.join("src/js/lib.js"), &root).unwrap();

        assert!(dependencies.is_empty());
        assert!(body.contains("const limit = 3;"));
        assert!(body.contains("exports.limit = limit;"));
        assert!(body.contains("exports.run = run;"));
        assert!(body.contains("exports.shown = hidden;"));
        assert!(!body.contains("export "));
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "src/js/main.js",
            "import { greet } from \"./lib.js\";\ngreet();\n",
        );
        write_module(dir.path(), "src/js/lib.js", "export function greet() {}\n");
        let config = test_config(dir.path());

        run(&config).unwrap();
        let first = fs::read(config.script.dest.join("bundle.js")).unwrap();
        run(&config).unwrap();
        assert_eq!(fs::read(config.script.dest.join("bundle.js")).unwrap(), first);
    }
}
