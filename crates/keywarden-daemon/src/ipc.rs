//! IPC server for daemon communication
//!
//! Provides a Unix domain socket for the CLI and assistive tools to talk to
//! the running daemon: status queries, pass-through activation, sticky mode,
//! and speech requests.
//!
//! Requests and responses are single JSON lines tagged with a `type` field:
//! - `{"type": "status"}`
//! - `{"type": "pass_through"}`
//! - `{"type": "set_sticky", "enabled": true}`
//! - `{"type": "force_action", "chord": "Search+Space"}`
//! - `{"type": "cancel_force_action"}`
//! - `{"type": "speak", "text": "..."}`

use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::engine::EngineMessage;

// ============================================================================
// IPC Message Types
// ============================================================================

/// Request messages sent from CLI/external tools to the daemon
///
/// NOTE: The request vocabulary must stay in sync with the CLI client in
/// keywarden-cli/src/main.rs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Query daemon status
    Status,
    /// Enable pass-through mode: the next shortcut flows through uninspected
    PassThrough,
    /// Set the sticky-mode preference
    SetSticky { enabled: bool },
    /// Capture all keyboard input until the given chord is pressed
    ForceAction { chord: String },
    /// Cancel a pending forced action
    CancelForceAction,
    /// Speak a message through the daemon's speech output
    Speak { text: String },
}

/// Response messages sent from the daemon back to CLI/external tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Operation completed successfully
    Success {
        /// Optional message with additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Daemon status information
    Status {
        /// Whether pass-through mode is currently enabled
        pass_through: bool,
        /// Current pass-through state machine phase
        pass_through_state: String,
        /// Whether sticky mode is enabled
        sticky_mode: bool,
        /// Whether a forced action capture is armed
        forced_action: bool,
        /// Grabbed keyboards
        devices: Vec<DeviceStatus>,
    },
    /// Error occurred while processing request
    Error {
        /// Error description
        message: String,
    },
}

/// Status information for a single grabbed keyboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device name (from evdev)
    pub name: String,
    /// Device path (e.g., /dev/input/event5)
    pub path: PathBuf,
}

/// A parsed request paired with the channel its response goes back on.
///
/// Connection tasks hand these to the engine so all dispatcher access stays
/// on the engine task.
#[derive(Debug)]
pub struct ControlRequest {
    pub request: IpcRequest,
    pub reply: oneshot::Sender<IpcResponse>,
}

// ============================================================================
// IPC Server
// ============================================================================

/// IPC server for daemon communication via Unix domain socket
///
/// The socket is created at `$XDG_RUNTIME_DIR/keywarden.sock` if available,
/// or falls back to `/tmp/keywarden-$UID.sock` if XDG_RUNTIME_DIR is not set.
///
/// The socket file is automatically removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Create a new IPC server, removing any stale socket file first.
    pub fn new() -> Result<Self> {
        let socket_path = Self::determine_socket_path();

        tracing::info!("IPC socket path: {}", socket_path.display());

        // Remove existing socket file if present (stale from previous run)
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!(
                    "Failed to remove stale socket file: {}",
                    socket_path.display()
                )
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Determine the socket path based on environment
    ///
    /// Prefers `$XDG_RUNTIME_DIR/keywarden.sock` if the environment variable
    /// is set, otherwise falls back to `/tmp/keywarden-$UID.sock`.
    ///
    /// NOTE: This must stay in sync with socket_path() in
    /// keywarden-cli/src/main.rs
    fn determine_socket_path() -> PathBuf {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(runtime_dir).join("keywarden.sock")
        } else {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/keywarden-{}.sock", uid))
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on shutdown
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Handle an incoming IPC connection.
///
/// Reads one JSON-line request, forwards it to the engine task, and writes
/// the engine's response back. Malformed requests are answered directly
/// without touching the engine.
pub async fn serve_connection(
    mut stream: UnixStream,
    engine_tx: mpsc::Sender<EngineMessage>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("Received IPC request: {}", line);

    let response = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let control = ControlRequest {
                request,
                reply: reply_tx,
            };
            if engine_tx.send(EngineMessage::Control(control)).await.is_err() {
                IpcResponse::Error {
                    message: "Daemon is shutting down".to_string(),
                }
            } else {
                match reply_rx.await {
                    Ok(response) => response,
                    Err(_) => IpcResponse::Error {
                        message: "Daemon dropped the request".to_string(),
                    },
                }
            }
        }
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            }
        }
    };

    let response_json =
        serde_json::to_string(&response).context("Failed to serialize IPC response")?;

    tracing::debug!("Sending IPC response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    // ========================================================================
    // IPC Message Serialization Tests
    // ========================================================================

    #[test]
    fn request_status_serialization() {
        let request = IpcRequest::Status;
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"status"}"#);

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn request_pass_through_serialization() {
        let request = IpcRequest::PassThrough;
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"pass_through"}"#);

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn request_set_sticky_serialization() {
        let request = IpcRequest::SetSticky { enabled: true };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"set_sticky","enabled":true}"#);

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn request_force_action_serialization() {
        let request = IpcRequest::ForceAction {
            chord: "Search+Space".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"force_action","chord":"Search+Space"}"#);

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);

        let cancel = IpcRequest::CancelForceAction;
        let json = serde_json::to_string(&cancel).unwrap();
        assert_eq!(json, r#"{"type":"cancel_force_action"}"#);
    }

    #[test]
    fn request_speak_serialization() {
        let request = IpcRequest::Speak {
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"speak","text":"hello"}"#);

        let parsed: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn response_success_serialization() {
        // Without message
        let response = IpcResponse::Success { message: None };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"type":"success"}"#);

        // With message
        let response = IpcResponse::Success {
            message: Some("Pass-through enabled".to_string()),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"type":"success","message":"Pass-through enabled"}"#);

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn response_status_serialization() {
        let response = IpcResponse::Status {
            pass_through: false,
            pass_through_state: "no-pass-through".to_string(),
            sticky_mode: true,
            forced_action: false,
            devices: vec![DeviceStatus {
                name: "AT Translated Set 2 keyboard".to_string(),
                path: PathBuf::from("/dev/input/event3"),
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""pass_through":false"#));
        assert!(json.contains(r#""pass_through_state":"no-pass-through""#));
        assert!(json.contains(r#""sticky_mode":true"#));
        assert!(json.contains(r#""forced_action":false"#));
        assert!(json.contains(r#""path":"/dev/input/event3""#));

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn response_error_serialization() {
        let response = IpcResponse::Error {
            message: "Invalid request".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Invalid request"}"#);

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn request_deserialization_with_whitespace() {
        let json = r#"{"type": "set_sticky", "enabled": false}"#;
        let request: IpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request, IpcRequest::SetSticky { enabled: false });

        let json = r#"{"type": "speak", "text": "Battery at 20 percent"}"#;
        let request: IpcRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(request, IpcRequest::Speak { .. }));
    }

    // ========================================================================
    // IPC Server Tests
    // ========================================================================

    #[tokio::test]
    async fn server_creation_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("XDG_RUNTIME_DIR", temp_dir.path());

        let socket_path = temp_dir.path().join("keywarden.sock");

        let server = IpcServer::new().unwrap();
        assert_eq!(server.socket_path(), &socket_path);
        assert!(socket_path.exists());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn server_removes_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        env::set_var("XDG_RUNTIME_DIR", temp_dir.path());

        let socket_path = temp_dir.path().join("keywarden.sock");

        std::fs::write(&socket_path, "stale").unwrap();
        assert!(socket_path.exists());

        // Should remove the stale file and bind successfully
        let server = IpcServer::new().unwrap();
        assert!(socket_path.exists());

        drop(server);
    }

    #[tokio::test]
    async fn full_request_round_trip() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let temp_dir = TempDir::new().unwrap();
        env::set_var("XDG_RUNTIME_DIR", temp_dir.path());

        let server = IpcServer::new().unwrap();
        let socket_path = server.socket_path().clone();

        // Mock engine answering control requests
        let (engine_tx, mut engine_rx) = mpsc::channel::<EngineMessage>(8);
        let engine_task = tokio::spawn(async move {
            if let Some(EngineMessage::Control(control)) = engine_rx.recv().await {
                assert_eq!(control.request, IpcRequest::PassThrough);
                let _ = control.reply.send(IpcResponse::Success {
                    message: Some("Pass-through enabled".to_string()),
                });
            }
        });

        let server_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            serve_connection(stream, engine_tx).await.unwrap();
        });

        let mut client = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        client
            .write_all(b"{\"type\":\"pass_through\"}\n")
            .await
            .unwrap();
        client.flush().await.unwrap();

        let (reader, _writer) = client.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();

        let response: IpcResponse = serde_json::from_str(response_line.trim()).unwrap();
        match response {
            IpcResponse::Success { message } => {
                assert_eq!(message.as_deref(), Some("Pass-through enabled"));
            }
            other => panic!("Expected Success response, got {:?}", other),
        }

        engine_task.await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_json_answered_without_engine() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let temp_dir = TempDir::new().unwrap();
        env::set_var("XDG_RUNTIME_DIR", temp_dir.path());

        let server = IpcServer::new().unwrap();
        let socket_path = server.socket_path().clone();

        // Engine channel with no receiver ever reading: the handler must
        // not need it for a parse failure.
        let (engine_tx, _engine_rx) = mpsc::channel::<EngineMessage>(8);

        let server_task = tokio::spawn(async move {
            let stream = server.accept().await.unwrap();
            serve_connection(stream, engine_tx).await.unwrap();
        });

        let mut client = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        client
            .write_all(b"{ invalid json garbage }\n")
            .await
            .unwrap();
        client.flush().await.unwrap();

        let (reader, _writer) = client.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();

        let response: IpcResponse = serde_json::from_str(response_line.trim()).unwrap();
        match response {
            IpcResponse::Error { message } => {
                assert!(message.contains("Invalid request"));
            }
            other => panic!("Expected Error response, got {:?}", other),
        }

        server_task.await.unwrap();
    }
}
