//! Modules module
//!
//! Built-in plugins, available without any external plugin library.
//! Includes a polyphonic sine instrument, a gain stage and a stereo delay.

pub mod delay;
pub mod gain;
pub mod sine_synth;

pub use delay::StereoDelay;
pub use gain::Gain;
pub use sine_synth::SineSynth;

use crate::dsp::{Plugin, PluginError, PluginHost};

/// Path of the built-in sine instrument.
pub const SINE: &str = "builtin:sine";
/// Path of the built-in gain effect.
pub const GAIN: &str = "builtin:gain";
/// Path of the built-in delay effect.
pub const DELAY: &str = "builtin:delay";

/// Resolves `builtin:` paths to the plugins in this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPlugins;

impl BuiltinPlugins {
    pub fn new() -> Self {
        Self
    }

    /// Every path this provider can load.
    pub fn paths() -> &'static [&'static str] {
        &[SINE, GAIN, DELAY]
    }
}

impl PluginHost for BuiltinPlugins {
    fn name(&self) -> &str {
        "builtin"
    }

    fn load(&self, path: &str) -> Result<Box<dyn Plugin>, PluginError> {
        match path.trim() {
            SINE => Ok(Box::new(SineSynth::new(SINE))),
            GAIN => Ok(Box::new(Gain::new(GAIN))),
            DELAY => Ok(Box::new(StereoDelay::new(DELAY))),
            other => Err(PluginError::NotFound(other.to_string())),
        }
    }
}
