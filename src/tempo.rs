//! Tempo sync.
//!
//! The shared tempo is owned by a [`TempoClock`]. When a peer-sync provider
//! is available, enabling the clock joins a [`LinkSession`] and the session
//! becomes the source of truth for the BPM; otherwise the BPM is tracked
//! locally and `link` reports the provider as unavailable.

use crate::capability::{Capability, CapabilityError};

/// Subsystem name shown by `deps` and in errors.
pub const LINK_SUBSYSTEM: &str = "link";

/// Tempo used when none is configured.
pub const DEFAULT_BPM: f64 = 120.0;

/// Accepted tempo range.
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

/// Errors raised by the tempo clock.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TempoError {
    #[error("bpm must be between {MIN_BPM} and {MAX_BPM}, got {0}")]
    InvalidBpm(f64),
    #[error(transparent)]
    Unavailable(#[from] CapabilityError),
    #[error("link session failed: {0}")]
    Session(String),
}

/// A joined tempo-sync session.
pub trait LinkSession: Send {
    /// Current session tempo.
    fn tempo(&self) -> f64;
    /// Proposes a new tempo to the session.
    fn set_tempo(&mut self, bpm: f64);
    /// Number of connected peers.
    fn num_peers(&self) -> usize;
    /// Leaves the session.
    fn disable(&mut self);
}

/// Creates tempo-sync sessions.
pub trait LinkProvider: Send + Sync {
    /// Provider name shown by `deps`.
    fn name(&self) -> &str;
    /// Joins a session, proposing `bpm` as the initial tempo.
    fn enable(&self, bpm: f64) -> Result<Box<dyn LinkSession>, TempoError>;
}

/// The host's tempo, optionally synced with peers.
pub struct TempoClock {
    provider: Capability<Box<dyn LinkProvider>>,
    session: Option<Box<dyn LinkSession>>,
    bpm: f64,
}

impl TempoClock {
    pub fn new(provider: Capability<Box<dyn LinkProvider>>, bpm: f64) -> Self {
        Self {
            provider,
            session: None,
            bpm: if valid_bpm(bpm) { bpm } else { DEFAULT_BPM },
        }
    }

    pub fn provider(&self) -> &Capability<Box<dyn LinkProvider>> {
        &self.provider
    }

    /// Joins a sync session, optionally setting the tempo first.
    ///
    /// Enabling an already enabled clock only applies the tempo.
    pub fn enable(&mut self, bpm: Option<f64>) -> Result<f64, TempoError> {
        if let Some(bpm) = bpm {
            check_bpm(bpm)?;
        }
        let provider = self.provider.get()?;
        if let Some(bpm) = bpm {
            self.bpm = bpm;
        }
        match self.session.as_mut() {
            Some(session) => session.set_tempo(self.bpm),
            None => self.session = Some(provider.enable(self.bpm)?),
        }
        Ok(self.bpm())
    }

    /// Leaves the sync session, keeping the last session tempo locally.
    pub fn disable(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.bpm = session.tempo();
            session.disable();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    /// Session tempo while enabled, local tempo otherwise.
    pub fn bpm(&self) -> f64 {
        self.session.as_ref().map_or(self.bpm, |s| s.tempo())
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), TempoError> {
        check_bpm(bpm)?;
        self.bpm = bpm;
        if let Some(session) = self.session.as_mut() {
            session.set_tempo(bpm);
        }
        Ok(())
    }

    pub fn num_peers(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.num_peers())
    }
}

fn valid_bpm(bpm: f64) -> bool {
    bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm)
}

fn check_bpm(bpm: f64) -> Result<(), TempoError> {
    if valid_bpm(bpm) {
        Ok(())
    } else {
        Err(TempoError::InvalidBpm(bpm))
    }
}
