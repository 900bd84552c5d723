//! MIDI input adapters.
//!
//! The sequencer input feeds slot inboxes through the routing table. The
//! mixer surface changes gains, parameters and mute/solo flags.

pub mod sequencer;
pub mod surface;

pub use sequencer::{SequencerInput, VIRTUAL_PORT_NAME};
pub use surface::{MixSurface, SurfaceAction};
