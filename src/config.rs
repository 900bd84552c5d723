//! Host configuration and runtime paths.

use std::path::{Path, PathBuf};

use crate::engine::{AudioDriver, StreamSettings};
use crate::tempo::DEFAULT_BPM;

/// Application name, used for directories, socket names and MIDI clients.
pub const APP_NAME: &str = "slotmix";

/// Socket file name inside the runtime directory.
const SOCKET_FILE: &str = "slotmix.sock";

/// Settings the host is composed with.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub sample_rate: u32,
    pub buffer_size: u32,
    /// Output channel count. The mix is always rendered for this many channels.
    pub channels: u16,
    /// Tempo before any session is restored.
    pub bpm: f64,
    pub driver: AudioDriver,
    /// Where `save`/`restore` read and write by default.
    pub session_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 512,
            channels: 2,
            bpm: DEFAULT_BPM,
            driver: AudioDriver::default(),
            session_path: default_session_path(),
        }
    }
}

impl HostConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            channels: self.channels,
        }
    }
}

/// Returns: ~/.config/slotmix/session.json
pub fn default_session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(APP_NAME)
        .join("session.json")
}

/// Default control socket for the current user.
///
/// `$XDG_RUNTIME_DIR/slotmix/slotmix.sock` when a runtime dir is set,
/// `/run/slotmix/slotmix.sock` for root, otherwise the per-user `/tmp` path.
pub fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(runtime_dir).join(APP_NAME).join(SOCKET_FILE);
    }
    if effective_uid() == 0 {
        return Path::new("/run").join(APP_NAME).join(SOCKET_FILE);
    }
    fallback_socket_path()
}

/// A socket path in `/tmp` that any user can create.
pub fn fallback_socket_path() -> PathBuf {
    Path::new("/tmp")
        .join(format!("{}-{}", APP_NAME, real_uid()))
        .join(SOCKET_FILE)
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

fn real_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.channels, 2);
        assert_eq!(config.bpm, 120.0);
        assert!(config.session_path.ends_with("slotmix/session.json"));
    }

    #[test]
    fn test_stream_settings_follow_config() {
        let config = HostConfig {
            sample_rate: 48000,
            buffer_size: 256,
            ..HostConfig::default()
        };
        let settings = config.stream_settings();
        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.buffer_size, 256);
        assert_eq!(settings.channels, 2);
    }

    #[test]
    fn test_fallback_socket_path_is_per_user() {
        let path = fallback_socket_path();
        assert!(path.starts_with("/tmp"));
        assert!(path.ends_with(SOCKET_FILE));
        let dir = path.parent().unwrap().file_name().unwrap().to_string_lossy();
        assert!(dir.starts_with("slotmix-"));
    }
}
