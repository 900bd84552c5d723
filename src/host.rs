//! The host: composition root for every subsystem.
//!
//! [`Host`] owns the mixer state, the event inbox, the audio engine, the MIDI
//! adapters, the tempo clock and the note scheduler. Control commands and
//! session restore go through its methods; it never holds a lock across
//! subsystems.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::capability::{Capability, CapabilityError, CapabilityStatus};
use crate::config::HostConfig;
use crate::dsp::{ParameterInfo, PluginError, PluginHost, PluginKind, SharedPlugin};
use crate::engine::{
    AudioDriver, AudioEngine, AudioError, ChannelSlot, DeviceInfo, DeviceSelector, EffectTarget,
    EventInbox, MidiBackend, MidiError, MidiEvent, MidiPortInfo, MixerState, NoteScheduler, StateError,
    StreamSettings, NUM_SLOTS,
};
use crate::midi::{MixSurface, SequencerInput};
use crate::modules::BuiltinPlugins;
use crate::persistence::session::{self, RestoreOutcome, SessionError, SessionFile};
use crate::tempo::{LinkProvider, TempoClock, TempoError};

/// Velocity used by `note` when none is given.
pub const DEFAULT_NOTE_VELOCITY: u8 = 100;

/// Length of a `note` when none is given.
pub const DEFAULT_NOTE_DURATION: Duration = Duration::from_millis(300);

/// Errors returned by host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Midi(#[from] MidiError),
    #[error(transparent)]
    Tempo(#[from] TempoError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Unavailable(#[from] CapabilityError),
    #[error("{0}")]
    InvalidArgument(String),
}

/// A plugin whose parameters a command addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamTarget {
    /// The instrument of a slot (0-based).
    Instrument(usize),
    /// An insert effect (both 0-based).
    SlotEffect { slot: usize, index: usize },
    /// A master-bus effect (0-based).
    MasterEffect(usize),
}

impl fmt::Display for ParamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamTarget::Instrument(slot) => write!(f, "slot {}", slot + 1),
            ParamTarget::SlotEffect { slot, index } => {
                write!(f, "slot {} fx[{}]", slot + 1, index + 1)
            }
            ParamTarget::MasterEffect(index) => write!(f, "master fx[{}]", index + 1),
        }
    }
}

/// Optional subsystems the host is composed with.
pub struct Providers {
    pub plugins: Capability<Box<dyn PluginHost>>,
    pub midi: Capability<MidiBackend>,
    pub link: Capability<Box<dyn LinkProvider>>,
}

impl Providers {
    /// Built-in plugins, platform MIDI if it initialises, no tempo sync.
    pub fn detect() -> Self {
        let plugins: Box<dyn PluginHost> = Box::new(BuiltinPlugins::new());
        Self {
            plugins: Capability::Available(plugins),
            midi: MidiBackend::probe(),
            link: Capability::unavailable(
                crate::tempo::LINK_SUBSYSTEM,
                "no tempo-sync provider built in",
            ),
        }
    }
}

/// The running mixer.
pub struct Host {
    config: HostConfig,
    state: Arc<MixerState>,
    inbox: Arc<EventInbox>,
    plugins: Capability<Box<dyn PluginHost>>,
    audio: Mutex<AudioEngine>,
    /// Output provider as probed at startup, for `deps`.
    audio_provider: Capability<String>,
    midi: Capability<MidiBackend>,
    sequencer: Mutex<Option<SequencerInput>>,
    surface: Mutex<Option<MixSurface>>,
    tempo: Mutex<TempoClock>,
    scheduler: NoteScheduler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Host {
    /// Composes a host with the providers found on this machine.
    pub fn new(config: HostConfig) -> Self {
        Self::with_providers(config, Providers::detect())
    }

    pub fn with_providers(config: HostConfig, providers: Providers) -> Self {
        let state = Arc::new(MixerState::new());
        let inbox = Arc::new(EventInbox::new());
        let audio = AudioEngine::new(
            config.stream_settings(),
            config.driver,
            Arc::clone(&state),
            Arc::clone(&inbox),
        );
        let audio_provider = match AudioEngine::probe(config.driver) {
            Ok(provider) => Capability::Available(provider),
            Err(e) => Capability::unavailable("audio", e.to_string()),
        };
        let scheduler = NoteScheduler::new(Arc::clone(&state), Arc::clone(&inbox));
        let tempo = TempoClock::new(providers.link, config.bpm);

        log::info!(
            "[Host] sr={} buf={} driver={} session={}",
            config.sample_rate,
            config.buffer_size,
            config.driver,
            config.session_path.display()
        );

        Self {
            config,
            state,
            inbox,
            plugins: providers.plugins,
            audio: Mutex::new(audio),
            audio_provider,
            midi: providers.midi,
            sequencer: Mutex::new(None),
            surface: Mutex::new(None),
            tempo: Mutex::new(tempo),
            scheduler,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<MixerState> {
        &self.state
    }

    pub fn inbox(&self) -> &Arc<EventInbox> {
        &self.inbox
    }

    pub fn session_path(&self) -> &Path {
        &self.config.session_path
    }

    // -- plugins -------------------------------------------------------------

    fn load_plugin(&self, path: &str, kind: PluginKind) -> Result<SharedPlugin, HostError> {
        let mut plugin = self.plugins.get()?.load(path)?;
        if plugin.info().kind != kind {
            return Err(match kind {
                PluginKind::Instrument => PluginError::NotAnInstrument(path.to_string()),
                PluginKind::Effect => PluginError::NotAnEffect(path.to_string()),
            }
            .into());
        }
        plugin.prepare(
            self.config.sample_rate as f32,
            self.config.buffer_size as usize,
        );
        Ok(SharedPlugin::new(plugin))
    }

    /// Loads an instrument into a slot, replacing anything there.
    /// Returns the slot name.
    pub fn load_instrument(
        &self,
        slot: usize,
        path: &str,
        name: Option<&str>,
    ) -> Result<String, HostError> {
        if slot >= NUM_SLOTS {
            return Err(StateError::InvalidSlot.into());
        }
        let plugin = self.load_plugin(path, PluginKind::Instrument)?;
        let name = name.map_or_else(|| plugin.name().to_string(), str::to_string);
        self.state
            .install_slot(slot, ChannelSlot::new(name.clone(), plugin))?;
        log::info!("[Host] slot {} = {} ({})", slot + 1, name, path);
        Ok(name)
    }

    /// Empties a slot. Pending events and scheduled note-offs for it are dropped.
    pub fn unload(&self, slot: usize) -> Result<Option<String>, HostError> {
        let previous = self.state.clear_slot(slot)?;
        self.inbox.clear_slot(slot);
        if let Some(old) = &previous {
            log::info!("[Host] slot {} unloaded ({})", slot + 1, old.name);
        }
        Ok(previous.map(|s| s.name))
    }

    /// Appends an effect to a slot's insert chain or the master bus.
    /// Returns its 0-based position.
    pub fn load_effect(
        &self,
        path: &str,
        target: EffectTarget,
        name: Option<&str>,
    ) -> Result<usize, HostError> {
        // Fail on an empty slot before paying for the load.
        self.state.load().effects(target)?;
        let plugin = self.load_plugin(path, PluginKind::Effect)?;
        let label = name.map_or_else(|| plugin.name().to_string(), str::to_string);
        let position = self.state.add_effect(target, plugin)?;
        match target {
            EffectTarget::Slot(slot) => {
                let slot_name = self
                    .state
                    .load()
                    .slot(slot)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                log::info!("[FX] '{}' -> slot {} ({})", label, slot + 1, slot_name);
            }
            EffectTarget::Master => log::info!("[FX] '{}' -> master bus", label),
        }
        Ok(position)
    }

    /// Removes an effect by 0-based position. Returns its name.
    pub fn remove_effect(&self, target: EffectTarget, index: usize) -> Result<String, HostError> {
        let removed = self.state.remove_effect(target, index)?;
        Ok(removed.name().to_string())
    }

    /// The plugin a parameter command addresses.
    pub fn plugin(&self, target: ParamTarget) -> Result<SharedPlugin, HostError> {
        let plugin = match target {
            ParamTarget::Instrument(slot) => self.state.instrument(slot)?,
            ParamTarget::SlotEffect { slot, index } => {
                self.state.effect(EffectTarget::Slot(slot), index)?
            }
            ParamTarget::MasterEffect(index) => self.state.effect(EffectTarget::Master, index)?,
        };
        Ok(plugin)
    }

    /// Parameter descriptions with current values.
    pub fn parameters(&self, target: ParamTarget) -> Result<Vec<(ParameterInfo, Option<f32>)>, HostError> {
        let plugin = self.plugin(target)?;
        let plugin = plugin.lock();
        Ok(plugin
            .parameters()
            .iter()
            .map(|info| (info.clone(), plugin.get_parameter(&info.name)))
            .collect())
    }

    pub fn set_parameter(&self, target: ParamTarget, name: &str, value: f32) -> Result<(), HostError> {
        let plugin = self.plugin(target)?;
        plugin.lock().set_parameter(name, value)?;
        Ok(())
    }

    // -- mix -----------------------------------------------------------------

    pub fn set_gain(&self, slot: usize, gain: f32) -> Result<(), HostError> {
        Ok(self.state.set_gain(slot, gain)?)
    }

    /// Flips mute. Returns the slot name and the new value.
    pub fn toggle_mute(&self, slot: usize) -> Result<(String, bool), HostError> {
        Ok(self.state.toggle_mute(slot)?)
    }

    /// Flips solo. Returns the slot name and the new value.
    pub fn toggle_solo(&self, slot: usize) -> Result<(String, bool), HostError> {
        Ok(self.state.toggle_solo(slot)?)
    }

    pub fn master_gain(&self) -> f32 {
        self.state.master_gain()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.state.set_master_gain(gain);
    }

    // -- routing -------------------------------------------------------------

    pub fn route(&self, channel: u8, slot: usize) -> Result<(), HostError> {
        self.state.route(channel, slot)?;
        Ok(())
    }

    /// Removes a route. Returns the slot it pointed at.
    pub fn unroute(&self, channel: u8) -> Option<usize> {
        self.state.unroute(channel)
    }

    // -- audio ---------------------------------------------------------------

    /// Starts (or restarts) audio output. Returns the device name.
    pub fn start_audio(&self, device: Option<&DeviceSelector>) -> Result<String, HostError> {
        Ok(lock(&self.audio).start(device)?)
    }

    pub fn stop_audio(&self) {
        lock(&self.audio).stop();
    }

    pub fn audio_running(&self) -> bool {
        lock(&self.audio).is_running()
    }

    /// Device name and driver while audio is running.
    pub fn audio_output(&self) -> Option<(String, AudioDriver)> {
        let audio = lock(&self.audio);
        audio
            .device_name()
            .map(|device| (device.to_string(), audio.driver()))
    }

    /// Settings the engine opens its output with.
    pub fn stream_settings(&self) -> StreamSettings {
        lock(&self.audio).settings()
    }

    pub fn audio_devices(&self) -> Result<Vec<DeviceInfo>, HostError> {
        Ok(lock(&self.audio).devices()?)
    }

    /// Blocks rendered since startup.
    pub fn blocks_rendered(&self) -> u64 {
        lock(&self.audio).blocks_rendered()
    }

    // -- MIDI ----------------------------------------------------------------

    pub fn midi_ports(&self) -> Result<Vec<MidiPortInfo>, HostError> {
        Ok(self.midi.get()?.list_ports()?)
    }

    /// Opens the sequencer input, replacing any open one. `None` creates a
    /// virtual port. Returns the port name.
    pub fn open_sequencer_midi(&self, port: Option<usize>) -> Result<String, HostError> {
        let backend = self.midi.get()?;
        let mut current = lock(&self.sequencer);
        if let Some(old) = current.take() {
            old.close();
        }
        let input = SequencerInput::open(
            backend,
            port,
            Arc::clone(&self.state),
            Arc::clone(&self.inbox),
        )?;
        let name = input.name().to_string();
        log::info!("[SEQ MIDI] Opened: {}", name);
        *current = Some(input);
        Ok(name)
    }

    /// Opens the mixer-surface input, replacing any open one.
    pub fn open_mixer_midi(&self, port: usize) -> Result<String, HostError> {
        let backend = self.midi.get()?;
        let mut current = lock(&self.surface);
        if let Some(old) = current.take() {
            old.close();
        }
        let surface = MixSurface::open(backend, port, Arc::clone(&self.state))?;
        let name = surface.name().to_string();
        log::info!("[MIDI Mix] Opened: {}", name);
        *current = Some(surface);
        Ok(name)
    }

    pub fn sequencer_port(&self) -> Option<String> {
        lock(&self.sequencer).as_ref().map(|s| s.name().to_string())
    }

    pub fn mixer_port(&self) -> Option<String> {
        lock(&self.surface).as_ref().map(|s| s.name().to_string())
    }

    fn close_midi(&self) {
        if let Some(input) = lock(&self.sequencer).take() {
            input.close();
        }
        if let Some(surface) = lock(&self.surface).take() {
            surface.close();
        }
    }

    /// Plays a note on a slot and schedules its note-off.
    ///
    /// The note-off is dropped if the slot is unloaded or reloaded first.
    pub fn send_note(
        &self,
        slot: usize,
        note: u8,
        velocity: u8,
        duration: Duration,
    ) -> Result<(), HostError> {
        if slot >= NUM_SLOTS {
            return Err(StateError::InvalidSlot.into());
        }
        if note > 127 || velocity > 127 {
            return Err(HostError::InvalidArgument(
                "note and velocity must be 0-127".into(),
            ));
        }
        self.inbox.enqueue(slot, MidiEvent::note_on(note, velocity));
        if !self
            .scheduler
            .schedule_after(duration, slot, MidiEvent::note_off(note))
        {
            // Without the scheduler the note would hang.
            self.inbox.enqueue(slot, MidiEvent::note_off(note));
        }
        Ok(())
    }

    // -- tempo ---------------------------------------------------------------

    /// Joins tempo sync. Returns the session tempo.
    pub fn enable_link(&self, bpm: Option<f64>) -> Result<f64, HostError> {
        let bpm = lock(&self.tempo).enable(bpm)?;
        log::info!("[Link] Enabled at {:.1} BPM", bpm);
        Ok(bpm)
    }

    pub fn disable_link(&self) {
        let mut tempo = lock(&self.tempo);
        if tempo.is_enabled() {
            tempo.disable();
            log::info!("[Link] Disabled");
        }
    }

    /// Tempo and peer count while synced.
    pub fn link_status(&self) -> Option<(f64, usize)> {
        let tempo = lock(&self.tempo);
        tempo
            .is_enabled()
            .then(|| (tempo.bpm(), tempo.num_peers()))
    }

    pub fn bpm(&self) -> f64 {
        lock(&self.tempo).bpm()
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), HostError> {
        Ok(lock(&self.tempo).set_bpm(bpm)?)
    }

    // -- session -------------------------------------------------------------

    /// Captures the current state.
    pub fn snapshot(&self) -> SessionFile {
        SessionFile::capture(
            &self.state.snapshot(),
            self.config.stream_settings(),
            self.bpm(),
        )
    }

    /// Saves to `path`, or the configured session path. Returns the path used.
    pub fn save_session(&self, path: Option<&Path>) -> Result<PathBuf, HostError> {
        let path = path.unwrap_or(&self.config.session_path).to_path_buf();
        session::save_to_file(&self.snapshot(), &path)?;
        Ok(path)
    }

    /// Restores from `path`, or the configured session path.
    pub fn restore_session(&self, path: Option<&Path>) -> Result<RestoreOutcome, HostError> {
        let path = path.unwrap_or(&self.config.session_path);
        Ok(session::restore(self, path)?)
    }

    // -- status --------------------------------------------------------------

    /// Availability of every optional subsystem.
    pub fn capabilities(&self) -> Vec<CapabilityStatus> {
        let tempo = lock(&self.tempo);
        vec![
            CapabilityStatus::of("plugins", &self.plugins, |p| p.name().to_string()),
            CapabilityStatus::of("audio", &self.audio_provider, |p| p.clone()),
            CapabilityStatus::of("midi", &self.midi, |_| String::from("midir")),
            CapabilityStatus::of(crate::tempo::LINK_SUBSYSTEM, tempo.provider(), |p| {
                p.name().to_string()
            }),
        ]
    }

    /// Saves the session, then stops audio, MIDI and tempo sync.
    pub fn shutdown(&self) {
        if let Err(e) = self.save_session(None) {
            log::error!("[Host] Could not save session: {}", e);
        }
        self.stop_audio();
        self.close_midi();
        self.disable_link();
        log::info!("[Host] Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AudioDriver;
    use crate::modules::{DELAY, GAIN, SINE};

    fn host() -> (Host, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            driver: AudioDriver::Offline,
            session_path: dir.path().join("session.json"),
            ..HostConfig::default()
        };
        let providers = Providers {
            plugins: Capability::Available(Box::new(BuiltinPlugins::new())),
            midi: Capability::unavailable("midi", "disabled in tests"),
            link: Capability::unavailable("link", "disabled in tests"),
        };
        (Host::with_providers(config, providers), dir)
    }

    #[test]
    fn test_load_instrument_uses_display_name() {
        let (host, _dir) = host();
        assert_eq!(host.load_instrument(0, SINE, None).unwrap(), "sine");
        assert_eq!(host.load_instrument(1, SINE, Some("lead")).unwrap(), "lead");
        assert_eq!(host.state().load().slot(1).unwrap().name, "lead");
    }

    #[test]
    fn test_load_rejects_wrong_kind() {
        let (host, _dir) = host();
        assert!(matches!(
            host.load_instrument(0, GAIN, None),
            Err(HostError::Plugin(PluginError::NotAnInstrument(_)))
        ));
        host.load_instrument(0, SINE, None).unwrap();
        assert!(matches!(
            host.load_effect(SINE, EffectTarget::Slot(0), None),
            Err(HostError::Plugin(PluginError::NotAnEffect(_)))
        ));
    }

    #[test]
    fn test_load_invalid_slot() {
        let (host, _dir) = host();
        let err = host.load_instrument(8, SINE, None).unwrap_err();
        assert_eq!(err.to_string(), "slot must be 1-8");
    }

    #[test]
    fn test_effect_on_empty_slot() {
        let (host, _dir) = host();
        let err = host.load_effect(GAIN, EffectTarget::Slot(2), None).unwrap_err();
        assert_eq!(err.to_string(), "Slot 3 is empty");
    }

    #[test]
    fn test_effects_and_parameters() {
        let (host, _dir) = host();
        host.load_instrument(0, SINE, None).unwrap();
        assert_eq!(host.load_effect(GAIN, EffectTarget::Slot(0), None).unwrap(), 0);
        assert_eq!(host.load_effect(DELAY, EffectTarget::Master, None).unwrap(), 0);

        let target = ParamTarget::SlotEffect { slot: 0, index: 0 };
        host.set_parameter(target, "gain", 2.0).unwrap();
        let params = host.parameters(target).unwrap();
        assert_eq!(params[0].0.name, "gain");
        assert_eq!(params[0].1, Some(2.0));

        assert_eq!(
            host.remove_effect(EffectTarget::Master, 0).unwrap(),
            "delay"
        );
        assert!(host.plugin(ParamTarget::MasterEffect(0)).is_err());
    }

    #[test]
    fn test_unload_clears_pending_events() {
        let (host, _dir) = host();
        host.load_instrument(0, SINE, None).unwrap();
        host.send_note(0, 60, 100, Duration::from_secs(60)).unwrap();
        assert_eq!(host.inbox().pending(0), 1);
        assert_eq!(host.unload(0).unwrap().as_deref(), Some("sine"));
        assert_eq!(host.inbox().pending(0), 0);
        assert_eq!(host.unload(0).unwrap(), None);
    }

    #[test]
    fn test_send_note_validates() {
        let (host, _dir) = host();
        assert!(host.send_note(9, 60, 100, DEFAULT_NOTE_DURATION).is_err());
        assert!(host.send_note(0, 200, 100, DEFAULT_NOTE_DURATION).is_err());
    }

    #[test]
    fn test_tempo_without_link() {
        let (host, _dir) = host();
        assert!(matches!(
            host.enable_link(Some(140.0)),
            Err(HostError::Tempo(TempoError::Unavailable(_)))
        ));
        host.set_bpm(96.0).unwrap();
        assert_eq!(host.bpm(), 96.0);
        assert_eq!(host.link_status(), None);
    }

    #[test]
    fn test_midi_unavailable_is_resource_error() {
        let (host, _dir) = host();
        let err = host.midi_ports().unwrap_err();
        assert_eq!(err.to_string(), "midi unavailable: disabled in tests");
        assert!(host.open_sequencer_midi(None).is_err());
        assert_eq!(host.sequencer_port(), None);
    }

    #[test]
    fn test_capabilities_report() {
        let (host, _dir) = host();
        let caps = host.capabilities();
        let names: Vec<_> = caps.iter().map(|c| c.subsystem).collect();
        assert_eq!(names, ["plugins", "audio", "midi", "link"]);
        assert!(caps[0].available);
        assert!(caps[1].available);
        assert!(!caps[2].available);
    }

    #[test]
    fn test_offline_audio_lifecycle() {
        let (host, _dir) = host();
        assert_eq!(host.audio_output(), None);
        assert_eq!(host.start_audio(None).unwrap(), "offline");
        assert!(host.audio_running());
        assert_eq!(
            host.audio_output(),
            Some((String::from("offline"), AudioDriver::Offline))
        );
        assert_eq!(host.stream_settings(), host.config().stream_settings());
        host.stop_audio();
        assert!(!host.audio_running());
        assert_eq!(host.audio_output(), None);
    }

    #[test]
    fn test_shutdown_saves_session() {
        let (host, dir) = host();
        host.load_instrument(0, SINE, None).unwrap();
        host.shutdown();
        assert!(dir.path().join("session.json").exists());
    }
}
