//! Audio Engine
//!
//! Binds a [`MixRenderer`] to an output. Two drivers exist: cpal hardware
//! output, and an offline driver that renders at the block cadence into a
//! scratch buffer for headless machines and tests.
//!
//! Either way the renderer lives on a dedicated thread. A cpal `Stream` is
//! not `Send`, so the cpal driver builds the stream on that thread and keeps
//! it there until told to stop. Stopping joins the thread, so once
//! [`AudioEngine::stop`] returns no further blocks are rendered.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::channels::{fault_channel, FaultMonitor, DEFAULT_FAULT_BUFFER_SIZE};
use super::inbox::EventInbox;
use super::renderer::MixRenderer;
use super::state::MixerState;

/// Name reported for the offline driver's only device.
pub const OFFLINE_DEVICE: &str = "offline";

/// Errors that can occur during audio engine operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    /// The platform audio subsystem cannot be used.
    #[error("audio subsystem unavailable: {0}")]
    Unavailable(String),
    /// No output device matched the selector.
    #[error("output device not found: {0}")]
    DeviceNotFound(String),
    /// Invalid or unsupported stream settings.
    #[error("invalid audio configuration: {0}")]
    Configuration(String),
    /// Failed to create the audio stream.
    #[error("failed to create audio stream: {0}")]
    StreamCreation(String),
    /// Failed to start playback.
    #[error("failed to start audio playback: {0}")]
    StreamPlayback(String),
    /// The render thread could not be started.
    #[error("audio thread failed: {0}")]
    Thread(String),
}

/// Which output the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AudioDriver {
    /// System audio through cpal.
    #[default]
    Cpal,
    /// No hardware; blocks are rendered on a timer and discarded.
    Offline,
}

impl fmt::Display for AudioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioDriver::Cpal => write!(f, "cpal"),
            AudioDriver::Offline => write!(f, "offline"),
        }
    }
}

/// Chooses an output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Position in the device list.
    Index(usize),
    /// Case-insensitive substring of the device name.
    Name(String),
}

impl DeviceSelector {
    /// Digits select by index, anything else by name.
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<usize>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::Name(text.trim().to_string()),
        }
    }

    fn matches(&self, index: usize, name: &str) -> bool {
        match self {
            DeviceSelector::Index(i) => *i == index,
            DeviceSelector::Name(s) => name.to_lowercase().contains(&s.to_lowercase()),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Index(i) => write!(f, "#{}", i),
            DeviceSelector::Name(s) => write!(f, "'{}'", s),
        }
    }
}

/// Information about an audio output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Whether this is the default output device.
    pub is_default: bool,
    /// Index in the device list (for selection).
    pub index: usize,
}

/// Stream parameters requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    /// Frames per block.
    pub buffer_size: u32,
    /// Output channels.
    pub channels: u16,
}

impl StreamSettings {
    fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 || self.buffer_size == 0 || self.channels == 0 {
            return Err(AudioError::Configuration(format!(
                "sr={} buf={} ch={}",
                self.sample_rate, self.buffer_size, self.channels
            )));
        }
        Ok(())
    }

    /// Wall-clock length of one block.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// A render thread and the means to stop it.
struct RunningStream {
    device: String,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    monitor: FaultMonitor,
}

/// Drives the mixer from an output device.
pub struct AudioEngine {
    settings: StreamSettings,
    driver: AudioDriver,
    state: Arc<MixerState>,
    inbox: Arc<EventInbox>,
    /// Blocks rendered since the engine was created.
    blocks: Arc<AtomicU64>,
    running: Option<RunningStream>,
}

impl AudioEngine {
    pub fn new(
        settings: StreamSettings,
        driver: AudioDriver,
        state: Arc<MixerState>,
        inbox: Arc<EventInbox>,
    ) -> Self {
        Self {
            settings,
            driver,
            state,
            inbox,
            blocks: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    /// Checks whether the driver can produce output on this machine.
    /// Returns a short provider description.
    pub fn probe(driver: AudioDriver) -> Result<String, AudioError> {
        match driver {
            AudioDriver::Offline => Ok(String::from("offline")),
            AudioDriver::Cpal => {
                let host = cpal::default_host();
                host.default_output_device()
                    .map(|_| format!("cpal ({})", host.id().name()))
                    .ok_or_else(|| AudioError::Unavailable("no default output device".into()))
            }
        }
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    pub fn driver(&self) -> AudioDriver {
        self.driver
    }

    /// Whether a render thread is currently bound to an output.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Name of the device in use, if running.
    pub fn device_name(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.device.as_str())
    }

    /// Number of blocks rendered so far.
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Lists output devices.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        match self.driver {
            AudioDriver::Offline => Ok(vec![DeviceInfo {
                name: OFFLINE_DEVICE.to_string(),
                is_default: true,
                index: 0,
            }]),
            AudioDriver::Cpal => enumerate_cpal_devices(),
        }
    }

    /// Binds the renderer to an output device and starts rendering.
    ///
    /// `None` selects the default device. A running engine is stopped and
    /// restarted on the new device. Returns the device name.
    pub fn start(&mut self, selector: Option<&DeviceSelector>) -> Result<String, AudioError> {
        self.settings.validate()?;
        if self.is_running() {
            self.stop();
        }

        let (fault_tx, fault_rx) = fault_channel(DEFAULT_FAULT_BUFFER_SIZE);
        let renderer = MixRenderer::new(
            Arc::clone(&self.state),
            Arc::clone(&self.inbox),
            fault_tx,
            self.settings.sample_rate as f32,
            self.settings.channels as usize,
            self.settings.buffer_size as usize,
        );

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);
        let settings = self.settings;
        let blocks = Arc::clone(&self.blocks);
        let selector = selector.cloned();
        let driver = self.driver;

        let thread = thread::Builder::new()
            .name("slotmix-audio".into())
            .spawn(move || match driver {
                AudioDriver::Cpal => {
                    run_cpal(settings, selector, renderer, blocks, stop_rx, ready_tx)
                }
                AudioDriver::Offline => {
                    run_offline(settings, selector, renderer, blocks, stop_rx, ready_tx)
                }
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        let device = match ready_rx.recv() {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::Thread("exited during startup".into()));
            }
        };

        log::info!(
            "[Audio] Started on {} sr={} buf={} ch={}",
            device,
            settings.sample_rate,
            settings.buffer_size,
            settings.channels
        );
        self.running = Some(RunningStream {
            device: device.clone(),
            stop_tx,
            thread: Some(thread),
            monitor: FaultMonitor::spawn(fault_rx),
        });
        Ok(device)
    }

    /// Stops rendering. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.stop_tx.send(());
            if let Some(thread) = running.thread.take() {
                if thread.join().is_err() {
                    log::error!("[Audio] Render thread panicked");
                }
            }
            running.monitor.stop();
            log::info!("[Audio] Stopped");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn enumerate_cpal_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Unavailable(e.to_string()))?;
    Ok(devices
        .enumerate()
        .filter_map(|(index, device)| {
            device.name().ok().map(|name| DeviceInfo {
                is_default: Some(&name) == default_name.as_ref(),
                name,
                index,
            })
        })
        .collect())
}

fn select_cpal_device(
    host: &cpal::Host,
    selector: Option<&DeviceSelector>,
) -> Result<cpal::Device, AudioError> {
    match selector {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".into())),
        Some(selector) => host
            .output_devices()
            .map_err(|e| AudioError::Unavailable(e.to_string()))?
            .enumerate()
            .find(|(index, device)| {
                device
                    .name()
                    .map(|name| selector.matches(*index, &name))
                    .unwrap_or(false)
            })
            .map(|(_, device)| device)
            .ok_or_else(|| AudioError::DeviceNotFound(selector.to_string())),
    }
}

/// Builds and plays a cpal stream that calls the renderer.
fn open_cpal_stream(
    settings: StreamSettings,
    selector: Option<&DeviceSelector>,
    mut renderer: MixRenderer,
    blocks: Arc<AtomicU64>,
) -> Result<(cpal::Stream, String), AudioError> {
    let host = cpal::default_host();
    let device = select_cpal_device(&host, selector)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    // Ask for a fixed block size only when the device advertises it.
    let buffer_size = match device.default_output_config().map(|c| *c.buffer_size()) {
        Ok(SupportedBufferSize::Range { min, max })
            if (min..=max).contains(&settings.buffer_size) =>
        {
            BufferSize::Fixed(settings.buffer_size)
        }
        Ok(_) => BufferSize::Default,
        Err(e) => return Err(AudioError::Configuration(e.to_string())),
    };
    let config = StreamConfig {
        channels: settings.channels,
        sample_rate: SampleRate(settings.sample_rate),
        buffer_size,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // REAL-TIME SAFE: the renderer never blocks
                renderer.render(data);
                blocks.fetch_add(1, Ordering::Relaxed);
            },
            move |err| {
                log::warn!("[Audio] Stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamCreation(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayback(e.to_string()))?;
    Ok((stream, name))
}

fn run_cpal(
    settings: StreamSettings,
    selector: Option<DeviceSelector>,
    renderer: MixRenderer,
    blocks: Arc<AtomicU64>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<String, AudioError>>,
) {
    let stream = match open_cpal_stream(settings, selector.as_ref(), renderer, blocks) {
        Ok((stream, name)) => {
            let _ = ready_tx.send(Ok(name));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Either a stop signal or the engine dropping its sender ends the stream.
    let _ = stop_rx.recv();
    if let Err(e) = stream.pause() {
        log::debug!("[Audio] Pause on stop failed: {}", e);
    }
    drop(stream);
}

fn run_offline(
    settings: StreamSettings,
    selector: Option<DeviceSelector>,
    mut renderer: MixRenderer,
    blocks: Arc<AtomicU64>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<String, AudioError>>,
) {
    if let Some(selector) = selector.filter(|s| !s.matches(0, OFFLINE_DEVICE)) {
        let _ = ready_tx.send(Err(AudioError::DeviceNotFound(selector.to_string())));
        return;
    }

    let mut buffer = vec![0.0_f32; settings.buffer_size as usize * settings.channels as usize];
    let period = settings.block_period();
    let _ = ready_tx.send(Ok(OFFLINE_DEVICE.to_string()));

    let mut deadline = Instant::now();
    loop {
        renderer.render(&mut buffer);
        blocks.fetch_add(1, Ordering::Relaxed);

        deadline += period;
        let wait = deadline.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            sample_rate: 48_000,
            buffer_size: 64,
            channels: 2,
        }
    }

    fn offline_engine() -> AudioEngine {
        AudioEngine::new(
            settings(),
            AudioDriver::Offline,
            Arc::new(MixerState::new()),
            Arc::new(EventInbox::new()),
        )
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::DeviceNotFound("'usb'".into());
        assert_eq!(err.to_string(), "output device not found: 'usb'");

        let err = AudioError::StreamCreation("test error".to_string());
        assert!(err.to_string().contains("test error"));
    }

    #[test]
    fn test_device_selector_parse() {
        assert_eq!(DeviceSelector::parse("3"), DeviceSelector::Index(3));
        assert_eq!(
            DeviceSelector::parse(" USB Audio "),
            DeviceSelector::Name("USB Audio".into())
        );
        assert!(DeviceSelector::parse("usb").matches(4, "Focusrite USB"));
        assert!(!DeviceSelector::parse("1").matches(0, "anything"));
    }

    #[test]
    fn test_block_period() {
        let s = StreamSettings {
            sample_rate: 44_100,
            buffer_size: 441,
            channels: 2,
        };
        assert_eq!(s.block_period(), Duration::from_millis(10));
    }

    #[test]
    fn test_offline_start_stop() {
        let mut engine = offline_engine();
        assert!(!engine.is_running());
        assert_eq!(engine.start(None).unwrap(), OFFLINE_DEVICE);
        assert!(engine.is_running());
        assert_eq!(engine.device_name(), Some(OFFLINE_DEVICE));

        thread::sleep(Duration::from_millis(20));
        engine.stop();
        assert!(!engine.is_running());

        // Nothing renders after stop returns.
        let blocks = engine.blocks_rendered();
        assert!(blocks > 0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(engine.blocks_rendered(), blocks);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut engine = offline_engine();
        engine.stop();
        engine.start(None).unwrap();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_offline_unknown_device() {
        let mut engine = offline_engine();
        let err = engine
            .start(Some(&DeviceSelector::Name("speakers".into())))
            .unwrap_err();
        assert!(matches!(err, AudioError::DeviceNotFound(_)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut engine = AudioEngine::new(
            StreamSettings {
                sample_rate: 0,
                buffer_size: 64,
                channels: 2,
            },
            AudioDriver::Offline,
            Arc::new(MixerState::new()),
            Arc::new(EventInbox::new()),
        );
        assert!(matches!(
            engine.start(None),
            Err(AudioError::Configuration(_))
        ));
    }

    #[test]
    fn test_offline_devices() {
        let engine = offline_engine();
        let devices = engine.devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_default);
    }
}
