//! MIDI input
//!
//! Parses raw controller bytes into [`MidiEvent`]s and wraps midir input
//! ports. The mixer never talks to midir directly: the host probes a
//! [`MidiBackend`] once and hands out [`MidiConnection`]s whose callbacks
//! receive raw bytes.

use midir::{Ignore, MidiInput, MidiInputConnection};

use crate::capability::Capability;

/// Client name announced to the MIDI subsystem.
pub const MIDI_CLIENT_NAME: &str = "slotmix";

/// A channel voice message, parsed from raw controller bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note On event.
    NoteOn {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        note: u8,
        /// Velocity (1-127).
        velocity: u8,
    },
    /// Note Off event. A Note On with velocity 0 parses as this.
    NoteOff {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        note: u8,
        /// Release velocity (0-127, often ignored).
        velocity: u8,
    },
    /// Control Change (CC) event.
    ControlChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Controller number (0-127).
        controller: u8,
        /// Controller value (0-127).
        value: u8,
    },
    /// Pitch Bend event.
    PitchBend {
        /// MIDI channel (0-15).
        channel: u8,
        /// Bend amount (-8192 to 8191, center = 0).
        value: i16,
    },
    /// Channel Aftertouch.
    ChannelPressure {
        /// MIDI channel (0-15).
        channel: u8,
        /// Pressure value (0-127).
        pressure: u8,
    },
    /// Polyphonic Aftertouch.
    PolyPressure {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        note: u8,
        /// Pressure value (0-127).
        pressure: u8,
    },
    /// Program Change.
    ProgramChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Program number (0-127).
        program: u8,
    },
}

impl MidiEvent {
    /// Note On on channel 0, with velocity 0 mapped to Note Off.
    pub fn note_on(note: u8, velocity: u8) -> Self {
        if velocity == 0 {
            Self::note_off(note)
        } else {
            MidiEvent::NoteOn {
                channel: 0,
                note: note & 0x7F,
                velocity: velocity & 0x7F,
            }
        }
    }

    /// Note Off on channel 0.
    pub fn note_off(note: u8) -> Self {
        MidiEvent::NoteOff {
            channel: 0,
            note: note & 0x7F,
            velocity: 0,
        }
    }

    /// Parse a MIDI event from raw bytes.
    ///
    /// Returns `None` for system messages, running status and truncated input.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        let channel = status & 0x0F;
        let d1 = rest.first().map(|b| b & 0x7F);
        let d2 = rest.get(1).map(|b| b & 0x7F);

        let event = match status & 0xF0 {
            0x80 => MidiEvent::NoteOff {
                channel,
                note: d1?,
                velocity: d2?,
            },
            0x90 => {
                let (note, velocity) = (d1?, d2?);
                if velocity == 0 {
                    MidiEvent::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    }
                } else {
                    MidiEvent::NoteOn {
                        channel,
                        note,
                        velocity,
                    }
                }
            }
            0xA0 => MidiEvent::PolyPressure {
                channel,
                note: d1?,
                pressure: d2?,
            },
            0xB0 => MidiEvent::ControlChange {
                channel,
                controller: d1?,
                value: d2?,
            },
            0xC0 => MidiEvent::ProgramChange {
                channel,
                program: d1?,
            },
            0xD0 => MidiEvent::ChannelPressure {
                channel,
                pressure: d1?,
            },
            0xE0 => {
                // 14-bit, LSB first, centred at 8192
                let raw = ((d2? as i16) << 7) | d1? as i16;
                MidiEvent::PitchBend {
                    channel,
                    value: raw - 8192,
                }
            }
            _ => return None,
        };
        Some(event)
    }

    /// The MIDI channel (0-15) this event was sent on.
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PolyPressure { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => channel,
        }
    }
}

/// Error type for MIDI operations.
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    /// The MIDI client could not be created.
    #[error("MIDI init error: {0}")]
    Init(String),
    /// Opening or connecting the port failed.
    #[error("MIDI connection error: {0}")]
    Connection(String),
    /// No input port has this index.
    #[error("MIDI port {index} not found ({available} available)")]
    PortNotFound { index: usize, available: usize },
    /// Virtual ports are not supported on this platform.
    #[error("virtual MIDI ports are not supported on this platform")]
    VirtualUnsupported,
}

/// Information about a MIDI input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    /// Human-readable port name.
    pub name: String,
    /// Index as accepted by [`MidiBackend::open`].
    pub index: usize,
}

/// Access to the platform MIDI input subsystem.
#[derive(Debug, Clone)]
pub struct MidiBackend {
    client_name: String,
}

impl MidiBackend {
    /// Checks that a MIDI client can be created on this machine.
    pub fn probe() -> Capability<MidiBackend> {
        match MidiInput::new(MIDI_CLIENT_NAME) {
            Ok(_) => Capability::Available(MidiBackend {
                client_name: MIDI_CLIENT_NAME.to_string(),
            }),
            Err(e) => {
                log::info!("[MIDI] Hardware MIDI unavailable: {}", e);
                Capability::unavailable("midi", e.to_string())
            }
        }
    }

    fn client(&self) -> Result<MidiInput, MidiError> {
        let mut input =
            MidiInput::new(&self.client_name).map_err(|e| MidiError::Init(e.to_string()))?;
        input.ignore(Ignore::All);
        Ok(input)
    }

    /// Lists the input ports currently visible.
    pub fn list_ports(&self) -> Result<Vec<MidiPortInfo>, MidiError> {
        let input = self.client()?;
        Ok(input
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| MidiPortInfo {
                name: input
                    .port_name(port)
                    .unwrap_or_else(|_| String::from("Unknown")),
                index,
            })
            .collect())
    }

    /// Opens an input port by index. `callback` receives the raw bytes of
    /// every message on midir's input thread.
    pub fn open<F>(&self, index: usize, label: &str, mut callback: F) -> Result<MidiConnection, MidiError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let input = self.client()?;
        let ports = input.ports();
        let port = ports.get(index).ok_or(MidiError::PortNotFound {
            index,
            available: ports.len(),
        })?;
        let name = input
            .port_name(port)
            .unwrap_or_else(|_| format!("port {}", index));

        let connection = input
            .connect(port, label, move |_stamp, data, _| callback(data), ())
            .map_err(|e| MidiError::Connection(e.to_string()))?;

        log::info!("[MIDI] Opened {} ({})", name, label);
        Ok(MidiConnection { name, connection })
    }

    /// Creates a virtual input port that other applications can connect to.
    #[cfg(unix)]
    pub fn open_virtual<F>(&self, port_name: &str, mut callback: F) -> Result<MidiConnection, MidiError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        use midir::os::unix::VirtualInput;

        let input = self.client()?;
        let connection = input
            .create_virtual(port_name, move |_stamp, data, _| callback(data), ())
            .map_err(|e| MidiError::Connection(e.to_string()))?;

        log::info!("[MIDI] Created virtual port {}", port_name);
        Ok(MidiConnection {
            name: port_name.to_string(),
            connection,
        })
    }

    /// Virtual ports need a Unix MIDI backend.
    #[cfg(not(unix))]
    pub fn open_virtual<F>(&self, _port_name: &str, _callback: F) -> Result<MidiConnection, MidiError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        Err(MidiError::VirtualUnsupported)
    }
}

/// An open input port. Dropping it closes the port.
pub struct MidiConnection {
    name: String,
    connection: MidiInputConnection<()>,
}

impl MidiConnection {
    /// Name of the connected port.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closes the port and stops the callback.
    pub fn close(self) {
        let MidiConnection { name, connection } = self;
        connection.close();
        log::info!("[MIDI] Closed {}", name);
    }
}

impl std::fmt::Debug for MidiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiConnection")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_event_from_bytes_note_on() {
        let event = MidiEvent::from_bytes(&[0x90, 60, 100]);
        assert_eq!(
            event,
            Some(MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn test_midi_event_from_bytes_note_off() {
        let event = MidiEvent::from_bytes(&[0x80, 60, 64]);
        assert_eq!(
            event,
            Some(MidiEvent::NoteOff {
                channel: 0,
                note: 60,
                velocity: 64
            })
        );
    }

    #[test]
    fn test_midi_event_from_bytes_note_on_zero_velocity() {
        let event = MidiEvent::from_bytes(&[0x93, 60, 0]);
        assert_eq!(
            event,
            Some(MidiEvent::NoteOff {
                channel: 3,
                note: 60,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_midi_event_from_bytes_control_change() {
        let event = MidiEvent::from_bytes(&[0xB0, 1, 64]).unwrap();
        assert!(matches!(
            event,
            MidiEvent::ControlChange {
                channel: 0,
                controller: 1,
                value: 64
            }
        ));
    }

    #[test]
    fn test_midi_event_from_bytes_pitch_bend() {
        // LSB=0, MSB=64 is the centre position
        assert_eq!(
            MidiEvent::from_bytes(&[0xE0, 0x00, 0x40]),
            Some(MidiEvent::PitchBend { channel: 0, value: 0 })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xE1, 0x00, 0x00]),
            Some(MidiEvent::PitchBend {
                channel: 1,
                value: -8192
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xE0, 0x7F, 0x7F]),
            Some(MidiEvent::PitchBend {
                channel: 0,
                value: 8191
            })
        );
    }

    #[test]
    fn test_midi_event_channel() {
        let event = MidiEvent::from_bytes(&[0x95, 60, 100]).unwrap();
        assert_eq!(event.channel(), 5);
        let event = MidiEvent::from_bytes(&[0xCF, 3]).unwrap();
        assert_eq!(event.channel(), 15);
    }

    #[test]
    fn test_midi_event_from_bytes_rejects_short_and_system() {
        assert!(MidiEvent::from_bytes(&[]).is_none());
        assert!(MidiEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiEvent::from_bytes(&[0xC0]).is_none());
        assert!(MidiEvent::from_bytes(&[0xF8]).is_none());
    }

    #[test]
    fn test_midi_event_from_bytes_masks_data_bytes() {
        let event = MidiEvent::from_bytes(&[0x90, 0xBC, 0xFF]).unwrap();
        assert_eq!(
            event,
            MidiEvent::NoteOn {
                channel: 0,
                note: 0x3C,
                velocity: 0x7F
            }
        );
    }

    #[test]
    fn test_midi_event_from_bytes_program_and_pressure() {
        assert_eq!(
            MidiEvent::from_bytes(&[0xC0, 42]),
            Some(MidiEvent::ProgramChange {
                channel: 0,
                program: 42
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xD0, 100]),
            Some(MidiEvent::ChannelPressure {
                channel: 0,
                pressure: 100
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xA2, 60, 30]),
            Some(MidiEvent::PolyPressure {
                channel: 2,
                note: 60,
                pressure: 30
            })
        );
    }

    #[test]
    fn test_note_constructors() {
        assert!(matches!(
            MidiEvent::note_on(60, 100),
            MidiEvent::NoteOn { note: 60, velocity: 100, .. }
        ));
        assert!(matches!(
            MidiEvent::note_on(60, 0),
            MidiEvent::NoteOff { note: 60, .. }
        ));
    }

    #[test]
    fn test_midi_event_is_send_and_copy() {
        fn assert_send_copy<T: Send + Copy>() {}
        assert_send_copy::<MidiEvent>();
    }
}
