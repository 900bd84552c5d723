//! Engine module
//!
//! Mixer state, event delivery and the audio render path.
//! Handles cpal integration, per-block mixing, render fault reporting and MIDI input.

pub mod audio_engine;
pub mod channels;
pub mod inbox;
pub mod midi_engine;
pub mod renderer;
pub mod routing;
pub mod scheduler;
pub mod state;

pub use audio_engine::{AudioDriver, AudioEngine, AudioError, DeviceInfo, DeviceSelector, StreamSettings};
pub use channels::{FaultKind, RenderFault};
pub use inbox::EventInbox;
pub use midi_engine::{MidiBackend, MidiConnection, MidiError, MidiEvent, MidiPortInfo};
pub use renderer::MixRenderer;
pub use routing::{RoutingTable, NUM_CHANNELS};
pub use scheduler::NoteScheduler;
pub use state::{
    ChannelSlot, EffectTarget, MasterBus, MixTable, MixerState, StateError, DEFAULT_SLOT_GAIN,
    NUM_SLOTS,
};
