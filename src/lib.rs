//! slotmix
//!
//! A headless eight-slot plugin mixer. MIDI from a sequencer is routed by
//! channel to instrument slots; each slot runs insert effects, the slots are
//! summed onto a master bus and sent to the audio device. Everything is
//! driven by text commands over a Unix socket.

pub mod capability;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod host;
pub mod midi;
pub mod modules;
pub mod persistence;
pub mod tempo;

pub use host::{Host, HostError, ParamTarget, Providers};
