//! Unix-socket control server.
//!
//! Each connection gets its own thread. A client receives the banner, then
//! sends one command per line; every response ends with [`END_OF_RESPONSE`]
//! on a line of its own. Commands from all clients run one at a time.

use std::fs;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::fallback_socket_path;
use crate::host::Host;

use super::commands::{self, BANNER};

/// Terminates every response, including the banner.
pub const END_OF_RESPONSE: &str = "\0";

/// Socket permissions: owner and group.
const SOCKET_MODE: u32 = 0o770;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot create socket directory {path}: {source} (try --sock {fallback})")]
    Directory {
        path: PathBuf,
        fallback: String,
        source: io::Error,
    },

    #[error("cannot bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    #[error("server thread failed: {0}")]
    Thread(io::Error),
}

/// The running control server. Stops on [`ControlServer::shutdown`] or drop.
pub struct ControlServer {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Binds `path` and starts accepting clients.
    ///
    /// A stale socket file at `path` is replaced.
    pub fn start(host: Arc<Host>, path: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| ServerError::Directory {
                path: dir.to_path_buf(),
                fallback: fallback_socket_path().display().to_string(),
                source,
            })?;
        }
        remove_stale(&path);

        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(SOCKET_MODE)) {
            log::warn!("[Server] Could not set permissions on {}: {}", path.display(), e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let commands = Arc::new(Mutex::new(()));
        let accept_thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("slotmix-control".into())
                .spawn(move || accept_loop(listener, host, commands, stop))
                .map_err(ServerError::Thread)?
        };

        log::info!("[Server] Listening on {}", path.display());
        Ok(Self {
            path,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting clients and removes the socket file.
    ///
    /// Connected clients keep their threads until they disconnect.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        let _ = UnixStream::connect(&self.path);
        if handle.join().is_err() {
            log::error!("[Server] Accept thread panicked");
        }
        remove_stale(&self.path);
        log::info!("[Server] Stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("[Server] Could not remove {}: {}", path.display(), e),
    }
}

fn accept_loop(
    listener: UnixListener,
    host: Arc<Host>,
    commands: Arc<Mutex<()>>,
    stop: Arc<AtomicBool>,
) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[Server] Accept failed: {}", e);
                continue;
            }
        };
        let host = Arc::clone(&host);
        let commands = Arc::clone(&commands);
        let spawned = thread::Builder::new()
            .name("slotmix-client".into())
            .spawn(move || {
                if let Err(e) = serve_client(stream, &host, &commands) {
                    match e.kind() {
                        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {}
                        _ => log::warn!("[Server] Client error: {}", e),
                    }
                }
                log::debug!("[Server] Client disconnected");
            });
        if let Err(e) = spawned {
            log::error!("[Server] Could not spawn client thread: {}", e);
        }
    }
}

fn serve_client(stream: UnixStream, host: &Host, commands: &Mutex<()>) -> io::Result<()> {
    log::debug!("[Server] Client connected");
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    respond(&mut writer, BANNER)?;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        // Undecodable bytes become U+FFFD; the command then fails validation.
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        let outcome = {
            let _serial = commands.lock().unwrap_or_else(PoisonError::into_inner);
            commands::dispatch(host, line)
        };
        if outcome.disconnect {
            respond(&mut writer, "[Host] Disconnected.")?;
            return Ok(());
        }
        respond(&mut writer, &outcome.output)?;
    }
}

/// Writes `text`, newline-terminated if non-empty, then the end marker.
fn respond(writer: &mut impl Write, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    if !text.is_empty() && !text.ends_with('\n') {
        writer.write_all(b"\n")?;
    }
    writer.write_all(END_OF_RESPONSE.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_terminates_output() {
        let mut buf = Vec::new();
        respond(&mut buf, "  gain = 0.50\n").unwrap();
        assert_eq!(buf, b"  gain = 0.50\n\0\n");

        buf.clear();
        respond(&mut buf, "no newline").unwrap();
        assert_eq!(buf, b"no newline\n\0\n");

        buf.clear();
        respond(&mut buf, "").unwrap();
        assert_eq!(buf, b"\0\n");
    }
}
