//! Polyphonic sine instrument.
//!
//! A small built-in instrument so the mixer can make sound without any
//! external plugin library. Each voice is a phase-accumulator sine with a
//! linear attack and an exponential release. Output is mono; the mixer
//! duplicates it to stereo.

use std::f32::consts::TAU;

use crate::dsp::{
    AudioBlock, ParameterBank, ParameterInfo, Plugin, PluginError, PluginInfo, PluginKind,
    SmoothedValue,
};
use crate::engine::MidiEvent;

/// Number of simultaneous voices.
pub const MAX_VOICES: usize = 16;

/// Sustain pedal controller.
const CC_SUSTAIN: u8 = 64;
/// All Sound Off.
const CC_ALL_SOUND_OFF: u8 = 120;
/// All Notes Off.
const CC_ALL_NOTES_OFF: u8 = 123;

/// Level below which a releasing voice is freed.
const SILENCE_THRESHOLD: f32 = 1e-4;

/// Voice envelope stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Hold,
    Release,
}

#[derive(Clone, Copy, Debug)]
struct Voice {
    note: u8,
    velocity: f32,
    /// Phase accumulator (0.0 to 1.0).
    phase: f32,
    level: f32,
    stage: Stage,
    /// Note-off arrived while the sustain pedal was down.
    sustained: bool,
    /// Trigger order, used to pick a voice to steal.
    age: u64,
}

impl Voice {
    const IDLE: Voice = Voice {
        note: 0,
        velocity: 0.0,
        phase: 0.0,
        level: 0.0,
        stage: Stage::Idle,
        sustained: false,
        age: 0,
    };

    fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }
}

/// Built-in polyphonic sine instrument.
///
/// # Parameters
///
/// - **attack** (0.001-5.0 s): Linear rise time.
/// - **release** (0.001-5.0 s): Exponential fall time after note-off.
/// - **level** (0.0-1.0): Output level.
/// - **bend_range** (0-12 semitones): Pitch bend depth.
pub struct SineSynth {
    info: PluginInfo,
    params: ParameterBank,
    voices: [Voice; MAX_VOICES],
    sample_rate: f32,
    /// Pitch bend in semitones.
    bend: f32,
    /// Raw bend position (-1.0 to 1.0), kept so range changes apply.
    bend_position: f32,
    sustain_pedal: bool,
    level: SmoothedValue,
    next_age: u64,
}

impl SineSynth {
    const PARAM_ATTACK: usize = 0;
    const PARAM_RELEASE: usize = 1;
    const PARAM_LEVEL: usize = 2;
    const PARAM_BEND_RANGE: usize = 3;

    pub fn new(path: &str) -> Self {
        let params = ParameterBank::new(vec![
            ParameterInfo::new("attack", 0.001, 5.0, 0.005),
            ParameterInfo::new("release", 0.001, 5.0, 0.2),
            ParameterInfo::normalized("level", 0.5),
            ParameterInfo::new("bend_range", 0.0, 12.0, 2.0),
        ]);
        let level = SmoothedValue::with_default_smoothing(params.value(Self::PARAM_LEVEL), 44100.0);
        Self {
            info: PluginInfo::from_path(path, PluginKind::Instrument),
            params,
            voices: [Voice::IDLE; MAX_VOICES],
            sample_rate: 44100.0,
            bend: 0.0,
            bend_position: 0.0,
            sustain_pedal: false,
            level,
            next_age: 0,
        }
    }

    /// Number of voices currently sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        // Retrigger a voice already playing this note, else take a free one,
        // else steal the quietest.
        let index = self
            .voices
            .iter()
            .position(|v| v.is_active() && v.note == note)
            .or_else(|| self.voices.iter().position(|v| !v.is_active()))
            .unwrap_or_else(|| self.quietest_voice());

        self.next_age += 1;
        let voice = &mut self.voices[index];
        if !voice.is_active() || voice.note != note {
            voice.phase = 0.0;
            voice.level = 0.0;
        }
        voice.note = note;
        voice.velocity = velocity as f32 / 127.0;
        voice.stage = Stage::Attack;
        voice.sustained = false;
        voice.age = self.next_age;
    }

    fn quietest_voice(&self) -> usize {
        self.voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let a_key = (a.stage != Stage::Release, a.level, a.age);
                let b_key = (b.stage != Stage::Release, b.level, b.age);
                a_key
                    .partial_cmp(&b_key)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn note_off(&mut self, note: u8) {
        let pedal = self.sustain_pedal;
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.note == note && matches!(v.stage, Stage::Attack | Stage::Hold))
        {
            if pedal {
                voice.sustained = true;
            } else {
                voice.stage = Stage::Release;
            }
        }
    }

    fn release_all(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.stage = Stage::Release;
            voice.sustained = false;
        }
    }

    fn set_sustain(&mut self, down: bool) {
        self.sustain_pedal = down;
        if !down {
            for voice in self.voices.iter_mut().filter(|v| v.sustained) {
                voice.sustained = false;
                voice.stage = Stage::Release;
            }
        }
    }

    fn update_bend(&mut self) {
        self.bend = self.bend_position * self.params.value(Self::PARAM_BEND_RANGE);
    }

    /// Per-sample linear attack increment.
    fn attack_step(&self) -> f32 {
        let samples = self.params.value(Self::PARAM_ATTACK) * self.sample_rate;
        if samples <= 1.0 {
            1.0
        } else {
            1.0 / samples
        }
    }

    /// Per-sample release multiplier, reaching about -43 dB after the release time.
    fn release_coeff(&self) -> f32 {
        let samples = self.params.value(Self::PARAM_RELEASE) * self.sample_rate;
        if samples <= 1.0 {
            0.0
        } else {
            (-5.0 / samples).exp()
        }
    }
}

/// Frequency of a MIDI note in Hz, with an offset in semitones.
#[inline]
pub fn note_to_hz(note: u8, semitones: f32) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0 + semitones) / 12.0)
}

impl Plugin for SineSynth {
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
        self.params.set(name, value)?;
        self.level.set_target(self.params.value(Self::PARAM_LEVEL));
        self.update_bend();
        Ok(())
    }

    fn prepare(&mut self, sample_rate: f32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.level.set_sample_rate(sample_rate);
        self.level.set_immediate(self.params.value(Self::PARAM_LEVEL));
        self.voices = [Voice::IDLE; MAX_VOICES];
    }

    fn send_event(&mut self, event: &MidiEvent) -> Result<(), PluginError> {
        match *event {
            MidiEvent::NoteOn { note, velocity, .. } => self.note_on(note, velocity),
            MidiEvent::NoteOff { note, .. } => self.note_off(note),
            MidiEvent::ControlChange {
                controller, value, ..
            } => match controller {
                CC_SUSTAIN => self.set_sustain(value >= 64),
                CC_ALL_NOTES_OFF => self.release_all(),
                CC_ALL_SOUND_OFF => self.voices = [Voice::IDLE; MAX_VOICES],
                _ => {}
            },
            MidiEvent::PitchBend { value, .. } => {
                self.bend_position = value as f32 / 8192.0;
                self.update_bend();
            }
            _ => {}
        }
        Ok(())
    }

    fn output_channels(&self, _input_channels: usize) -> usize {
        1
    }

    fn process(
        &mut self,
        _input: &AudioBlock,
        output: &mut AudioBlock,
        _sample_rate: f32,
    ) -> Result<(), PluginError> {
        output.clear();
        if output.channels() == 0 {
            return Ok(());
        }

        let attack_step = self.attack_step();
        let release_coeff = self.release_coeff();
        let sample_rate = self.sample_rate;
        let bend = self.bend;
        let out = output.channel_mut(0);

        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            let increment = note_to_hz(voice.note, bend) / sample_rate;
            for sample in out.iter_mut() {
                match voice.stage {
                    Stage::Attack => {
                        voice.level += attack_step;
                        if voice.level >= 1.0 {
                            voice.level = 1.0;
                            voice.stage = Stage::Hold;
                        }
                    }
                    Stage::Release => {
                        voice.level *= release_coeff;
                        if voice.level < SILENCE_THRESHOLD {
                            voice.level = 0.0;
                            voice.stage = Stage::Idle;
                            break;
                        }
                    }
                    Stage::Hold | Stage::Idle => {}
                }

                *sample += (voice.phase * TAU).sin() * voice.level * voice.velocity;
                voice.phase = (voice.phase + increment).fract();
            }
        }

        for sample in out.iter_mut() {
            *sample *= self.level.next();
        }
        Ok(())
    }
}
