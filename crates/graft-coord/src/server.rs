//! The coordinator socket server.
//!
//! Listens on a Unix domain socket and serves one [`CoordService`] to any
//! number of hosting processes. Each connection must open with
//! [`CoordRequest::Hello`]; the server assigns a session id, answers
//! requests one at a time, and evicts the session's running records when
//! the connection drops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoordError, CoordResult};
use crate::proto::{CoordRequest, CoordResponse, Envelope, MAX_FRAME_LEN};
use crate::service::CoordService;

/// The well-known coordinator socket path.
///
/// `$GRAFT_RUNTIME_DIR/coord.sock` when the variable is set, otherwise
/// `~/.graft/coord.sock` (falling back to `/tmp` without a home).
#[must_use]
pub fn coordinator_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("GRAFT_RUNTIME_DIR") {
        return PathBuf::from(dir).join("coord.sock");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".graft").join("coord.sock")
}

/// A running coordinator server.
pub struct ServerHandle {
    task: tokio::task::JoinHandle<()>,
    socket_path: PathBuf,
}

impl ServerHandle {
    /// The socket path the server is listening on.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, drop every open connection, and remove the socket
    /// file.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
        let _ = std::fs::remove_file(&self.socket_path);
        info!("Coordinator server shut down");
    }
}

/// Bind `socket_path` and serve `service` until shut down.
///
/// A stale socket file at the path is removed before binding.
///
/// # Errors
///
/// Returns an error when the socket cannot be bound.
pub async fn spawn_server(
    service: Arc<CoordService>,
    socket_path: PathBuf,
) -> CoordResult<ServerHandle> {
    // Remove stale socket file if it exists
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    if let Some(parent) = socket_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let listener = UnixListener::bind(&socket_path).map_err(|e| CoordError::Transport {
        message: format!("failed to bind {}: {e}", socket_path.display()),
    })?;
    info!(path = %socket_path.display(), "Coordinator listening on Unix domain socket");

    let task = tokio::spawn(async move {
        // Dropping the JoinSet (when this task is aborted) aborts every
        // connection task with it.
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let service = Arc::clone(&service);
                        connections.spawn(async move {
                            handle_client(stream, service).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept coordinator connection");
                    }
                },
                Some(_finished) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    });

    Ok(ServerHandle { task, socket_path })
}

async fn handle_client(mut stream: UnixStream, service: Arc<CoordService>) {
    // Handshake: the first frame must be Hello.
    let session = match read_envelope(&mut stream).await {
        Ok(Envelope {
            id,
            body: CoordRequest::Hello { pid, process_name },
        }) => {
            let session = Uuid::new_v4();
            service.attach_session(session, pid, process_name);
            let welcome = Envelope {
                id,
                body: CoordResponse::Welcome { session },
            };
            if write_envelope(&mut stream, &welcome).await.is_err() {
                service.drop_session(session);
                return;
            }
            session
        }
        Ok(Envelope { body, .. }) => {
            warn!(request = ?body, "Connection opened without hello, dropping");
            return;
        }
        Err(e) => {
            debug!(error = %e, "Connection closed before handshake");
            return;
        }
    };
    debug!(%session, "Hosting process connected");

    loop {
        let envelope = match read_envelope(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(%session, error = %e, "Connection closed");
                break;
            }
        };
        let response = Envelope {
            id: envelope.id,
            body: service.handle(session, envelope.body),
        };
        if let Err(e) = write_envelope(&mut stream, &response).await {
            warn!(%session, error = %e, "Failed to write response");
            break;
        }
    }

    service.drop_session(session);
}

async fn read_envelope(stream: &mut UnixStream) -> CoordResult<Envelope<CoordRequest>> {
    let payload = read_frame(stream).await?;
    serde_json::from_slice(&payload).map_err(|e| CoordError::Protocol {
        message: format!("malformed request frame: {e}"),
    })
}

async fn write_envelope(
    stream: &mut UnixStream,
    envelope: &Envelope<CoordResponse>,
) -> CoordResult<()> {
    let payload = serde_json::to_vec(envelope).map_err(|e| CoordError::Protocol {
        message: format!("failed to encode response: {e}"),
    })?;
    write_frame(stream, &payload).await?;
    Ok(())
}

/// Read one length-prefixed frame. Protocol: 4 byte big-endian length
/// prefix, then the JSON payload.
async fn read_frame(stream: &mut UnixStream) -> CoordResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = usize::try_from(u32::from_be_bytes(len_buf)).map_err(|_| CoordError::Protocol {
        message: "frame length does not fit this platform".to_string(),
    })?;
    if len > MAX_FRAME_LEN {
        return Err(CoordError::Protocol {
            message: format!("frame of {len} bytes exceeds maximum"),
        });
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> CoordResult<()> {
    let len = u32::try_from(payload.len()).map_err(|_| CoordError::Protocol {
        message: "frame too large to encode".to_string(),
    })?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CoordError::Protocol {
            message: format!("frame of {} bytes exceeds maximum", payload.len()),
        });
    }
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::LifecycleEvent;
    use graft_core::{PackageName, ProcessTopology};
    use std::time::Duration;

    async fn write_request(
        stream: &mut UnixStream,
        envelope: &Envelope<CoordRequest>,
    ) -> CoordResult<()> {
        let payload = serde_json::to_vec(envelope).unwrap();
        write_frame(stream, &payload).await
    }

    async fn read_response(stream: &mut UnixStream) -> CoordResult<Envelope<CoordResponse>> {
        let payload = read_frame(stream).await?;
        Ok(serde_json::from_slice(&payload).unwrap())
    }

    fn service() -> Arc<CoordService> {
        Arc::new(CoordService::new(
            PackageName::from_static("com.example.host"),
            ProcessTopology::Standalone,
        ))
    }

    #[tokio::test]
    async fn hello_then_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.sock");
        let handle = spawn_server(service(), path.clone()).await.unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        write_request(
            &mut stream,
            &Envelope {
                id: 1,
                body: CoordRequest::Hello {
                    pid: 42,
                    process_name: "com.example.host:p0".to_string(),
                },
            },
        )
        .await
        .unwrap();
        let welcome = read_response(&mut stream).await.unwrap();
        assert_eq!(welcome.id, 1);
        assert!(matches!(welcome.body, CoordResponse::Welcome { .. }));

        write_request(
            &mut stream,
            &Envelope {
                id: 2,
                body: CoordRequest::GetAllRunningPlugins,
            },
        )
        .await
        .unwrap();
        let resp = read_response(&mut stream).await.unwrap();
        assert_eq!(resp.id, 2);
        assert_eq!(
            resp.body,
            CoordResponse::Packages {
                packages: Vec::new()
            }
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn connection_without_hello_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.sock");
        let handle = spawn_server(service(), path.clone()).await.unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        write_request(
            &mut stream,
            &Envelope {
                id: 1,
                body: CoordRequest::GetAllRunningPlugins,
            },
        )
        .await
        .unwrap();
        assert!(read_response(&mut stream).await.is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_evicts_session_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.sock");
        let service = service();
        let handle = spawn_server(Arc::clone(&service), path.clone()).await.unwrap();
        let package = PackageName::from_static("com.example.notes");

        let mut stream = UnixStream::connect(&path).await.unwrap();
        write_request(
            &mut stream,
            &Envelope {
                id: 1,
                body: CoordRequest::Hello {
                    pid: 42,
                    process_name: "com.example.host:p0".to_string(),
                },
            },
        )
        .await
        .unwrap();
        read_response(&mut stream).await.unwrap();

        write_request(
            &mut stream,
            &Envelope {
                id: 2,
                body: CoordRequest::ComponentEvent {
                    event: LifecycleEvent::ApplicationAttached {
                        package: package.clone(),
                        process_name: "com.example.host:p0".to_string(),
                    },
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(read_response(&mut stream).await.unwrap().body, CoordResponse::Ack);
        assert!(service.is_running(&package));

        drop(stream);
        for _ in 0..200 {
            if !service.is_running(&package) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!service.is_running(&package));

        handle.shutdown().await;
    }
}
