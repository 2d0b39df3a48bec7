//! WebSocket live reload.
//!
//! Keeps the registry of connected browser clients and exposes one
//! operation to the stages: broadcast a reload. The registry exists from
//! process start so the initial build can run against it before the
//! listener is bound; broadcasting with no clients is a no-op.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use crate::{debug, log};

/// Maximum port retry attempts.
const MAX_PORT_RETRIES: u16 = 10;

// =============================================================================
// Message protocol
// =============================================================================

/// Message sent to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadMessage {
    /// Full page reload after a stage wrote fresh output
    Reload {
        /// Which stage produced the new output
        category: String,
    },

    /// Connection established
    Connected {
        /// Server version for compatibility check
        version: String,
    },
}

impl ReloadMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"reload"}"#.to_string())
    }
}

// =============================================================================
// Reloader
// =============================================================================

/// Connected-client registry with a broadcast operation.
#[derive(Clone)]
pub struct Reloader {
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
}

impl Default for Reloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reloader {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind the WebSocket listener and start accepting clients.
    ///
    /// Returns the actual port, which may differ from `base_port` when it
    /// was already in use.
    pub fn listen(&self, base_port: u16) -> Result<u16> {
        let (listener, port) = try_bind_port(base_port, MAX_PORT_RETRIES)?;
        let clients = Arc::clone(&self.clients);
        thread::spawn(move || accept_loop(listener, clients));
        Ok(port)
    }

    /// Tell every connected client to reload. Dead clients are dropped.
    pub fn notify_reload(&self, category: &str) {
        let message = ReloadMessage::Reload {
            category: category.to_string(),
        }
        .to_json();

        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain_mut(|ws| ws.send(Message::Text(message.clone().into())).is_ok());
        if before > 0 {
            debug!("reload"; "{} -> {} client(s)", category, clients.len());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

fn accept_loop(listener: TcpListener, clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => match tungstenite::accept(stream) {
                Ok(mut ws) => {
                    let hello = ReloadMessage::Connected {
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    };
                    let _ = ws.send(Message::Text(hello.to_json().into()));
                    clients.lock().push(ws);
                }
                Err(e) => debug!("reload"; "handshake failed: {}", e),
            },
            Err(e) => log!("reload"; "accept error: {}", e),
        }
    }
}

/// Try binding to port, retry with incremented port if in use.
fn try_bind_port(base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(format!("127.0.0.1:{}", port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to bind reload server after {} attempts: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// =============================================================================
// Client script
// =============================================================================

/// Browser-side reload client, served from memory.
const CLIENT_JS: &str = r#"(function () {
  function connect() {
    var socket = new WebSocket("ws://" + location.hostname + ":%PORT%");
    socket.onmessage = function (event) {
      var message = JSON.parse(event.data);
      if (message.type === "reload") location.reload();
    };
    socket.onclose = function () {
      setTimeout(connect, 1000);
    };
  }
  connect();
})();
"#;

/// Render the client script for the bound reload port.
pub fn client_script(port: u16) -> String {
    CLIENT_JS.replace("%PORT%", &port.to_string())
}

// =============================================================================
// Tests
// =============================================================================
