//! Synchronous client transport.
//!
//! Hosting processes talk to the coordinator over a blocking Unix socket: a
//! reader thread feeds received frames into a channel, writes go out under
//! a mutex, and a shared liveness flag flips as soon as the socket breaks.
//! Calls are request/response with correlation ids; late frames from a
//! timed-out call are skipped by id.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CoordError, CoordResult};
use crate::proto::{CoordRequest, CoordResponse, Envelope, MAX_FRAME_LEN};

pub(crate) struct Transport {
    writer: Mutex<UnixStream>,
    frames: Mutex<Receiver<Result<Vec<u8>, String>>>,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl Transport {
    /// Connect to the coordinator socket and start the reader thread.
    pub(crate) fn connect(path: &Path) -> CoordResult<Self> {
        let stream = UnixStream::connect(path).map_err(|e| CoordError::Transport {
            message: format!("connect {}: {e}", path.display()),
        })?;
        let reader = stream.try_clone().map_err(|e| CoordError::Transport {
            message: format!("clone socket: {e}"),
        })?;
        let alive = Arc::new(AtomicBool::new(true));
        let frames = spawn_reader_thread(reader, Arc::clone(&alive));
        Ok(Self {
            writer: Mutex::new(stream),
            frames: Mutex::new(frames),
            alive,
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send one request and block for its response.
    ///
    /// A timeout leaves the transport usable; a socket failure marks it
    /// dead.
    pub(crate) fn call(
        &self,
        request: &CoordRequest,
        timeout: Duration,
    ) -> CoordResult<CoordResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope { id, body: request };
        let payload = serde_json::to_vec(&envelope).map_err(|e| CoordError::Protocol {
            message: format!("failed to encode request: {e}"),
        })?;

        {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Err(e) = write_frame(&mut writer, &payload) {
                self.alive.store(false, Ordering::Release);
                return Err(CoordError::Transport {
                    message: format!("write failed: {e}"),
                });
            }
        }

        let deadline = Instant::now().checked_add(timeout).unwrap_or_else(Instant::now);
        let frames = self
            .frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match frames.recv_timeout(remaining) {
                Ok(Ok(bytes)) => {
                    let envelope: Envelope<CoordResponse> = serde_json::from_slice(&bytes)
                        .map_err(|e| CoordError::Protocol {
                            message: format!("malformed response frame: {e}"),
                        })?;
                    if envelope.id == id {
                        return Ok(envelope.body);
                    }
                    debug!(expected = id, got = envelope.id, "Skipping stale response");
                }
                Ok(Err(message)) => return Err(CoordError::Transport { message }),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CoordError::Transport {
                        message: "request timed out".to_string(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.alive.store(false, Ordering::Release);
                    return Err(CoordError::Transport {
                        message: "connection closed".to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Shutting down the socket (not just this fd) unblocks the reader
        // thread's clone with an EOF, so the thread exits with us.
        let _ = self
            .writer
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .shutdown(std::net::Shutdown::Both);
    }
}

fn spawn_reader_thread(
    mut stream: UnixStream,
    alive: Arc<AtomicBool>,
) -> Receiver<Result<Vec<u8>, String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        loop {
            match read_frame(&mut stream) {
                Ok(payload) => {
                    if tx.send(Ok(payload)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    alive.store(false, Ordering::Release);
                    let _ = tx.send(Err(format!("coordinator connection lost: {e}")));
                    break;
                }
            }
        }
    });
    rx
}

pub(crate) fn read_frame(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = usize::try_from(u32::from_be_bytes(len_buf)).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "frame length overflow")
    })?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum length",
        ));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

pub(crate) fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large")
    })?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}
