//! DSP module
//!
//! Audio blocks, plugin parameters and the plugin contract shared by
//! instruments and effects.

pub mod buffer;
pub mod parameter;
pub mod plugin;
pub mod smoothed_value;

pub use buffer::AudioBlock;
pub use parameter::{ParameterBank, ParameterInfo};
pub use plugin::{Plugin, PluginError, PluginHost, PluginInfo, PluginKind, SharedPlugin};
pub use smoothed_value::SmoothedValue;
