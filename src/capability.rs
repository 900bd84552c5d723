//! Optional subsystems.
//!
//! Plugin hosting, audio output, tempo sync and hardware MIDI are each
//! decided once when the host is composed. A missing subsystem is not a
//! startup failure: the commands that need it report a resource error instead.

/// Error returned when a command needs a subsystem that is not available.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{subsystem} unavailable: {reason}")]
pub struct CapabilityError {
    /// Subsystem name as shown by `deps`.
    pub subsystem: &'static str,
    /// Why it could not be initialised.
    pub reason: String,
}

/// An optional subsystem: either a working provider or the reason it is missing.
#[derive(Debug)]
pub enum Capability<T> {
    /// The provider initialised successfully.
    Available(T),
    /// The provider could not be initialised.
    Unavailable(CapabilityError),
}

impl<T> Capability<T> {
    /// Marks a subsystem as unavailable.
    pub fn unavailable(subsystem: &'static str, reason: impl Into<String>) -> Self {
        Capability::Unavailable(CapabilityError {
            subsystem,
            reason: reason.into(),
        })
    }

    /// Returns true if the provider is usable.
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    /// Borrows the provider, or returns the reason it is missing.
    pub fn get(&self) -> Result<&T, CapabilityError> {
        match self {
            Capability::Available(provider) => Ok(provider),
            Capability::Unavailable(err) => Err(err.clone()),
        }
    }

    /// Mutably borrows the provider, or returns the reason it is missing.
    pub fn get_mut(&mut self) -> Result<&mut T, CapabilityError> {
        match self {
            Capability::Available(provider) => Ok(provider),
            Capability::Unavailable(err) => Err(err.clone()),
        }
    }
}

/// One row of the `deps` report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityStatus {
    pub subsystem: &'static str,
    pub provider: String,
    pub available: bool,
    pub reason: Option<String>,
}

impl CapabilityStatus {
    /// Builds a report row from a capability.
    pub fn of<T>(
        subsystem: &'static str,
        capability: &Capability<T>,
        provider: impl FnOnce(&T) -> String,
    ) -> Self {
        match capability {
            Capability::Available(p) => Self {
                subsystem,
                provider: provider(p),
                available: true,
                reason: None,
            },
            Capability::Unavailable(err) => Self {
                subsystem,
                provider: String::from("-"),
                available: false,
                reason: Some(err.reason.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_capability() {
        let cap = Capability::Available(42);
        assert!(cap.is_available());
        assert_eq!(cap.get(), Ok(&42));
    }

    #[test]
    fn test_unavailable_capability_reports_reason() {
        let cap: Capability<u32> = Capability::unavailable("tempo-sync", "no link library");
        assert!(!cap.is_available());
        let err = cap.get().unwrap_err();
        assert_eq!(err.to_string(), "tempo-sync unavailable: no link library");
    }

    #[test]
    fn test_status_row() {
        let cap = Capability::Available("cpal");
        let row = CapabilityStatus::of("audio", &cap, |p| p.to_string());
        assert!(row.available);
        assert_eq!(row.provider, "cpal");

        let missing: Capability<&str> = Capability::unavailable("midi", "no ALSA sequencer");
        let row = CapabilityStatus::of("midi", &missing, |p| p.to_string());
        assert!(!row.available);
        assert_eq!(row.reason.as_deref(), Some("no ALSA sequencer"));
    }
}
