//! Development server for the output tree.
//!
//! Static file serving only: URL normalization, traversal-safe path
//! resolution, MIME detection, and live-reload script injection into HTML.
//! The reload signal itself travels over the WebSocket server in
//! [`reload`].

pub mod reload;
mod response;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tiny_http::{Request, Server};

use crate::config::Config;
use crate::{log, state};

/// Default WebSocket port for live reload.
pub const DEFAULT_RELOAD_PORT: u16 = 35729;

/// URL of the in-memory live reload client script.
pub const CLIENT_SCRIPT_URL: &str = "/__livereload.js";

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Bound server ready to accept requests.
pub struct BoundServer {
    server: Arc<Server>,
}

/// Bind the HTTP server on the configured port (with retry) without
/// entering the request loop.
pub fn bind(config: &Config) -> Result<BoundServer> {
    let interface = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let (server, addr) = bind_with_retry(interface, config.port)?;
    let server = Arc::new(server);

    // Registered so Ctrl+C can unblock the request loop
    state::register_server(Arc::clone(&server));

    log!("serve"; "http://{}", addr);
    Ok(BoundServer { server })
}

/// Bind to the specified interface and port, with automatic port retry.
fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr)> {
    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(_) if offset + 1 < MAX_PORT_RETRIES => continue,
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to bind after {} attempts (ports {}-{}): {}",
                    MAX_PORT_RETRIES,
                    base_port,
                    port,
                    e
                ));
            }
        }
    }
    unreachable!()
}

impl BoundServer {
    /// Start the request loop (blocking until shutdown).
    pub fn run(self, config: &'static Config, reload_port: u16) -> Result<()> {
        // Small pool so one slow transfer does not block other requests
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build()?;

        for request in self.server.incoming_requests() {
            if state::is_shutdown() {
                break;
            }
            pool.spawn(move || {
                if let Err(e) = handle_request(request, config, reload_port) {
                    log!("serve"; "request error: {e}");
                }
            });
        }
        Ok(())
    }
}

/// Handle a single HTTP request.
fn handle_request(request: Request, config: &Config, reload_port: u16) -> Result<()> {
    // The reload client script is served from memory
    if request.url() == CLIENT_SCRIPT_URL {
        return response::respond_client_script(request, reload_port);
    }

    if let Some(path) = resolve_path(request.url(), &config.output_root) {
        return response::respond_file(request, &path);
    }

    response::respond_not_found(request)
}

/// Resolve URL to filesystem path, handling index.html for directories.
pub(crate) fn resolve_path(url: &str, serve_root: &Path) -> Option<PathBuf> {
    let clean = normalize_url(url);

    // Reject paths with suspicious patterns early
    if clean.contains("..") {
        return None;
    }

    let local = serve_root.join(&clean);

    // Canonicalize to resolve symlinks and verify the path stays under
    // serve_root; prevents traversal via symlinks or encoded sequences
    let canonical = local.canonicalize().ok()?;
    let root_canonical = serve_root.canonicalize().ok()?;

    if !canonical.starts_with(&root_canonical) {
        return None;
    }

    if canonical.is_file() {
        return Some(canonical);
    }

    if canonical.is_dir() {
        let index = canonical.join("index.html");
        if index.is_file() {
            return Some(index);
        }
    }

    None
}

/// Normalize URL: decode, strip query string, trim slashes.
fn normalize_url(url: &str) -> String {
    use percent_encoding::percent_decode_str;
    let decoded = percent_decode_str(url)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    let path = decoded.split('?').next().unwrap_or(&decoded);
    path.trim_matches('/').to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("/"), "");
        assert_eq!(normalize_url("/styles.css?v=2"), "styles.css");
        assert_eq!(normalize_url("/assets/img%20name.png"), "assets/img name.png");
    }

    #[test]
    fn test_resolve_path_serves_index_for_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let resolved = resolve_path("/", dir.path()).unwrap();
        assert!(resolved.ends_with("index.html"));
    }

    #[test]
    fn test_resolve_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        assert!(resolve_path("/../secret.txt", dir.path()).is_none());
        assert!(resolve_path("/%2e%2e/secret.txt", dir.path()).is_none());
    }

    #[test]
    fn test_resolve_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_path("/missing.css", dir.path()).is_none());
    }
}
