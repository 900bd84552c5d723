//! Mixer-surface input.
//!
//! Maps a fixed hardware layout of eight channel strips onto the mixer:
//! each strip has a fader (slot gain), three knobs (the instrument's first
//! three parameters), a mute button and a solo button. A separate fader
//! drives the master gain. Controller numbers follow the factory layout of
//! common eight-strip surfaces.

use std::sync::Arc;

use crate::engine::{MidiBackend, MidiConnection, MidiError, MidiEvent, MixerState, NUM_SLOTS};

/// Fader CC per strip.
pub const FADER_CCS: [u8; NUM_SLOTS] = [19, 23, 27, 31, 49, 53, 57, 61];

/// Knob CCs per strip, top to bottom.
pub const KNOB_CCS: [[u8; 3]; NUM_SLOTS] = [
    [16, 17, 18],
    [20, 21, 22],
    [24, 25, 26],
    [28, 29, 30],
    [46, 47, 48],
    [50, 51, 52],
    [54, 55, 56],
    [58, 59, 60],
];

/// Mute button note per strip.
pub const MUTE_NOTES: [u8; NUM_SLOTS] = [1, 4, 7, 10, 13, 16, 19, 22];

/// Solo button note per strip.
pub const SOLO_NOTES: [u8; NUM_SLOTS] = [3, 6, 9, 12, 15, 18, 21, 24];

/// Master fader CC.
pub const MASTER_FADER_CC: u8 = 62;

/// Connection label for the surface input.
const LABEL: &str = "slotmix-mix-in";

/// What a surface message changed.
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceAction {
    SlotGain { slot: usize, gain: f32 },
    MasterGain(f32),
    Parameter { slot: usize, name: String, value: f32 },
    Mute { slot: usize, name: String, muted: bool },
    Solo { slot: usize, name: String, solo: bool },
}

/// Applies one raw message to the mixer. Returns `None` when the message
/// is not part of the layout or targets an empty slot.
pub fn handle_raw(state: &MixerState, bytes: &[u8]) -> Option<SurfaceAction> {
    match MidiEvent::from_bytes(bytes)? {
        MidiEvent::ControlChange {
            controller, value, ..
        } => handle_cc(state, controller, value),
        // Velocity 0 already parses as a note-off, so only presses land here.
        MidiEvent::NoteOn { note, .. } => handle_button(state, note),
        _ => None,
    }
}

fn handle_cc(state: &MixerState, controller: u8, value: u8) -> Option<SurfaceAction> {
    let position = value as f32 / 127.0;

    if controller == MASTER_FADER_CC {
        state.set_master_gain(position);
        return Some(SurfaceAction::MasterGain(position));
    }

    if let Some(slot) = FADER_CCS.iter().position(|&cc| cc == controller) {
        state.set_gain(slot, position).ok()?;
        return Some(SurfaceAction::SlotGain {
            slot,
            gain: position,
        });
    }

    let (slot, knob) = KNOB_CCS.iter().enumerate().find_map(|(slot, knobs)| {
        knobs
            .iter()
            .position(|&cc| cc == controller)
            .map(|knob| (slot, knob))
    })?;

    let instrument = state.instrument(slot).ok()?;
    let mut plugin = instrument.lock();
    let info = plugin.parameters().get(knob)?.clone();
    let mapped = info.denormalize(position);
    match plugin.set_parameter(&info.name, mapped) {
        Ok(()) => Some(SurfaceAction::Parameter {
            slot,
            name: info.name,
            value: mapped,
        }),
        Err(e) => {
            log::debug!("[MIDI Mix] slot {} knob {}: {}", slot + 1, knob + 1, e);
            None
        }
    }
}

fn handle_button(state: &MixerState, note: u8) -> Option<SurfaceAction> {
    if let Some(slot) = MUTE_NOTES.iter().position(|&n| n == note) {
        let (name, muted) = state.toggle_mute(slot).ok()?;
        log::info!(
            "[MIDI Mix] slot {} {}: {}",
            slot + 1,
            name,
            if muted { "MUTED" } else { "unmuted" }
        );
        return Some(SurfaceAction::Mute { slot, name, muted });
    }

    if let Some(slot) = SOLO_NOTES.iter().position(|&n| n == note) {
        let (name, solo) = state.toggle_solo(slot).ok()?;
        log::info!(
            "[MIDI Mix] slot {} {}: {}",
            slot + 1,
            name,
            if solo { "SOLO" } else { "unsolo" }
        );
        return Some(SurfaceAction::Solo { slot, name, solo });
    }

    None
}

/// An open mixer-surface input port.
#[derive(Debug)]
pub struct MixSurface {
    connection: MidiConnection,
}

impl MixSurface {
    pub fn open(backend: &MidiBackend, port: usize, state: Arc<MixerState>) -> Result<Self, MidiError> {
        let connection = backend.open(port, LABEL, move |bytes| {
            handle_raw(&state, bytes);
        })?;
        Ok(Self { connection })
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn close(self) {
        self.connection.close();
    }
}
