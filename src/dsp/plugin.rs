//! The plugin capability contract.
//!
//! Instruments and effects are both [`Plugin`]s. The mixer only relies on
//! the operations below; how a plugin is actually loaded and executed is the
//! business of a [`PluginHost`] implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::buffer::AudioBlock;
use super::parameter::ParameterInfo;
use crate::engine::MidiEvent;

/// Whether a plugin generates sound or processes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Generates audio in response to MIDI events.
    Instrument,
    /// Processes incoming audio.
    Effect,
}

/// Identity of a loaded plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    /// Display name.
    pub name: String,
    /// Path (or built-in identifier) the plugin was loaded from.
    pub path: String,
    /// Instrument or effect.
    pub kind: PluginKind,
}

impl PluginInfo {
    /// Creates plugin info, deriving the display name from the file stem of `path`.
    pub fn from_path(path: &str, kind: PluginKind) -> Self {
        Self {
            name: display_name(path),
            path: path.to_string(),
            kind,
        }
    }
}

/// Returns the file stem of a plugin path, or the part after `builtin:`.
pub fn display_name(path: &str) -> String {
    if let Some(id) = path.strip_prefix("builtin:") {
        return id.to_string();
    }
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Errors reported by plugins and plugin hosts.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PluginError {
    /// The host could not resolve the path.
    #[error("plugin not found: {0}")]
    NotFound(String),
    /// An effect was loaded where an instrument was expected.
    #[error("{0} is not an instrument")]
    NotAnInstrument(String),
    /// An instrument was loaded where an effect was expected.
    #[error("{0} is not an effect")]
    NotAnEffect(String),
    /// No parameter has this name.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    /// The value lies outside the parameter range.
    #[error("parameter '{name}' = {value} outside {min:.3} .. {max:.3}")]
    OutOfRange {
        name: String,
        value: f32,
        min: f32,
        max: f32,
    },
    /// The plugin failed to produce audio for a block.
    #[error("render failed: {0}")]
    Render(String),
    /// The plugin refused an event.
    #[error("event rejected: {0}")]
    Event(String),
}

/// The interface every instrument and effect implements.
///
/// # Real-time constraints
///
/// [`send_event`](Plugin::send_event), [`output_channels`](Plugin::output_channels)
/// and [`process`](Plugin::process) run on the audio thread. They must not
/// block, and should not allocate once [`prepare`](Plugin::prepare) has run.
pub trait Plugin: Send + 'static {
    /// Returns the plugin's identity.
    fn info(&self) -> &PluginInfo;

    /// Returns the parameter list in a stable order.
    fn parameters(&self) -> &[ParameterInfo];

    /// Returns the current value of a named parameter.
    fn get_parameter(&self, name: &str) -> Option<f32>;

    /// Sets a named parameter.
    fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), PluginError>;

    /// Called once after loading with the engine's sample rate and block size.
    fn prepare(&mut self, sample_rate: f32, max_block_size: usize);

    /// Delivers one MIDI event. Effects ignore events by default.
    fn send_event(&mut self, _event: &MidiEvent) -> Result<(), PluginError> {
        Ok(())
    }

    /// Number of output channels produced for a given input channel count.
    fn output_channels(&self, input_channels: usize) -> usize {
        input_channels
    }

    /// Processes one block. `output` is already shaped to
    /// `output_channels(input.channels()) × input.frames()`.
    fn process(
        &mut self,
        input: &AudioBlock,
        output: &mut AudioBlock,
        sample_rate: f32,
    ) -> Result<(), PluginError>;
}

/// Collects every parameter value of a plugin, keyed by name.
pub fn parameter_values(plugin: &dyn Plugin) -> BTreeMap<String, f32> {
    plugin
        .parameters()
        .iter()
        .filter_map(|p| plugin.get_parameter(&p.name).map(|v| (p.name.clone(), v)))
        .collect()
}

/// Loads plugins from paths.
pub trait PluginHost: Send + Sync {
    /// Short name of this host, shown by `deps`.
    fn name(&self) -> &str;

    /// Loads the plugin at `path`.
    fn load(&self, path: &str) -> Result<Box<dyn Plugin>, PluginError>;
}

/// A plugin shared between the control plane and the audio thread.
///
/// Cloning is cheap and yields a handle to the same plugin instance.
#[derive(Clone)]
pub struct SharedPlugin {
    info: Arc<PluginInfo>,
    inner: Arc<Mutex<Box<dyn Plugin>>>,
}

impl SharedPlugin {
    /// Wraps a loaded plugin.
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            info: Arc::new(plugin.info().clone()),
            inner: Arc::new(Mutex::new(plugin)),
        }
    }

    /// The plugin's identity, readable without locking.
    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Source path.
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Locks the plugin for control-plane access, waiting if the audio thread holds it.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Plugin>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the plugin without waiting. Returns `None` if it is busy.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn Plugin>>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Returns true if both handles refer to the same plugin instance.
    pub fn ptr_eq(&self, other: &SharedPlugin) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPlugin")
            .field("name", &self.info.name)
            .field("path", &self.info.path)
            .field("kind", &self.info.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::parameter::ParameterBank;

    /// A minimal effect that passes audio through unchanged.
    struct Passthrough {
        info: PluginInfo,
        params: ParameterBank,
    }

    impl Passthrough {
        fn new() -> Self {
            Self {
                info: PluginInfo::from_path("/plugins/Passthrough.vst3", PluginKind::Effect),
                params: ParameterBank::new(vec![ParameterInfo::normalized("mix", 1.0)]),
            }
        }
    }

    impl Plugin for Passthrough {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        fn parameters(&self) -> &[ParameterInfo] {
            self.params.infos()
        }

        fn get_parameter(&self, name: &str) -> Option<f32> {
            self.params.get(name)
        }

        fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), PluginError> {
            self.params.set(name, value)
        }

        fn prepare(&mut self, _sample_rate: f32, _max_block_size: usize) {}

        fn process(
            &mut self,
            input: &AudioBlock,
            output: &mut AudioBlock,
            _sample_rate: f32,
        ) -> Result<(), PluginError> {
            for (src, dst) in input.iter().zip(output.iter_mut()) {
                dst.copy_from_slice(src);
            }
            Ok(())
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("/usr/lib/vst3/Dexed.vst3"), "Dexed");
        assert_eq!(display_name("builtin:sine"), "sine");
        assert_eq!(display_name("Reverb"), "Reverb");
    }

    #[test]
    fn test_parameter_values() {
        let mut plugin = Passthrough::new();
        plugin.set_parameter("mix", 0.25).unwrap();
        let values = parameter_values(&plugin);
        assert_eq!(values.get("mix"), Some(&0.25));
    }

    #[test]
    fn test_shared_plugin_try_lock_busy() {
        let shared = SharedPlugin::new(Box::new(Passthrough::new()));
        let guard = shared.lock();
        assert!(shared.try_lock().is_none());
        drop(guard);
        assert!(shared.try_lock().is_some());
    }

    #[test]
    fn test_shared_plugin_info_without_lock() {
        let shared = SharedPlugin::new(Box::new(Passthrough::new()));
        let _guard = shared.lock();
        assert_eq!(shared.name(), "Passthrough");
        assert_eq!(shared.info().kind, PluginKind::Effect);
    }

    #[test]
    fn test_shared_plugin_clone_is_same_instance() {
        let a = SharedPlugin::new(Box::new(Passthrough::new()));
        let b = a.clone();
        let c = SharedPlugin::new(Box::new(Passthrough::new()));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_plugin_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SharedPlugin>();
    }
}
