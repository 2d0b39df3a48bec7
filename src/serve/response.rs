//! HTTP response handlers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tiny_http::{Header, Request, Response, StatusCode};

use super::reload;
use crate::utils::mime;

/// Respond with a static file, injecting the reload script into HTML.
pub fn respond_file(request: Request, path: &Path) -> Result<()> {
    let content_type = mime::from_path(path);
    let body = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let body = maybe_inject_reload(body, content_type);
    send_body(request, 200, content_type, body)
}

/// Respond with plain-text 404.
pub fn respond_not_found(request: Request) -> Result<()> {
    send_body(request, 404, mime::types::PLAIN, b"404 Not Found".to_vec())
}

/// Respond with the live reload client script from memory.
pub fn respond_client_script(request: Request, reload_port: u16) -> Result<()> {
    send_body(
        request,
        200,
        mime::types::JAVASCRIPT,
        reload::client_script(reload_port).into_bytes(),
    )
}

/// Inject the reload script tag if the content is HTML.
fn maybe_inject_reload(body: Vec<u8>, content_type: &str) -> Vec<u8> {
    if content_type.starts_with("text/html") {
        inject_script_tag(&body)
    } else {
        body
    }
}

/// Insert the script tag before `</body>`, or append when absent.
pub(crate) fn inject_script_tag(content: &[u8]) -> Vec<u8> {
    let tag = format!("<script src=\"{}\"></script>", super::CLIENT_SCRIPT_URL);
    let tag_bytes = tag.as_bytes();

    const PATTERN: &[u8] = b"</body>";

    if let Some(pos) = content
        .windows(PATTERN.len())
        .rposition(|w| w.eq_ignore_ascii_case(PATTERN))
    {
        let mut result = Vec::with_capacity(content.len() + tag_bytes.len());
        result.extend_from_slice(&content[..pos]);
        result.extend_from_slice(tag_bytes);
        result.extend_from_slice(&content[pos..]);
        return result;
    }

    // No </body>; browsers handle a trailing script gracefully
    let mut result = Vec::with_capacity(content.len() + tag_bytes.len());
    result.extend_from_slice(content);
    result.extend_from_slice(tag_bytes);
    result
}

fn send_body(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", content_type));
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &'static str, value: &str) -> Header {
    Header::from_bytes(key, value).expect("static header values are well formed")
}

// ============================================================================
// Tests
// ============================================================================
