//! Per-block mixing.
//!
//! [`MixRenderer`] is owned by whichever thread drives the output device.
//! Each call drains the event inbox, renders every loaded slot, runs the
//! effect chains, sums, applies master gain, clamps and writes interleaved
//! samples. It never blocks: the mixer table is read through `ArcSwap`, and
//! plugin handles are only ever `try_lock`ed.

use std::sync::Arc;

use super::channels::{FaultKind, FaultSender, RenderFault};
use super::inbox::EventInbox;
use super::midi_engine::MidiEvent;
use super::state::{MixerState, NUM_SLOTS};
use crate::dsp::{AudioBlock, SharedPlugin};

/// Renders the mix, one block per call.
pub struct MixRenderer {
    state: Arc<MixerState>,
    inbox: Arc<EventInbox>,
    faults: FaultSender,
    sample_rate: f32,
    /// Output channel count.
    channels: usize,
    /// Events taken from the inbox but not yet delivered (busy instruments keep theirs).
    pending: [Vec<MidiEvent>; NUM_SLOTS],
    /// Slot generation the pending events belong to.
    pending_generation: [u64; NUM_SLOTS],
    /// Silent input handed to instruments.
    silence: AudioBlock,
    /// Output of the instrument, then of each effect in turn.
    slot_buf: AudioBlock,
    /// Effect output before it is swapped into `slot_buf`.
    fx_buf: AudioBlock,
    /// Summed mix.
    mix: AudioBlock,
}

impl MixRenderer {
    /// Creates a renderer with buffers sized for `max_frames`.
    pub fn new(
        state: Arc<MixerState>,
        inbox: Arc<EventInbox>,
        faults: FaultSender,
        sample_rate: f32,
        channels: usize,
        max_frames: usize,
    ) -> Self {
        Self {
            state,
            inbox,
            faults,
            sample_rate,
            channels,
            pending: std::array::from_fn(|_| Vec::with_capacity(64)),
            pending_generation: [0; NUM_SLOTS],
            silence: AudioBlock::new(channels, max_frames),
            slot_buf: AudioBlock::new(channels, max_frames),
            fx_buf: AudioBlock::new(channels, max_frames),
            mix: AudioBlock::new(channels, max_frames),
        }
    }

    /// Output channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Renders one block into an interleaved output buffer.
    ///
    /// The block length is `output.len() / channels` frames. Trailing samples
    /// that do not form a whole frame are zeroed.
    pub fn render(&mut self, output: &mut [f32]) {
        if self.channels == 0 {
            output.fill(0.0);
            return;
        }
        let frames = output.len() / self.channels;
        self.render_planar(frames);

        let channels = self.channels;
        let (whole, rest) = output.split_at_mut(frames * channels);
        for (ch, samples) in self.mix.iter().enumerate() {
            for (frame, &sample) in samples.iter().enumerate() {
                whole[frame * channels + ch] = sample;
            }
        }
        rest.fill(0.0);
    }

    /// Renders one block and returns the clamped planar mix.
    pub fn render_planar(&mut self, frames: usize) -> &AudioBlock {
        let channels = self.channels;
        let sample_rate = self.sample_rate;

        // Retained events never outlive an unload or reload.
        for (index, pending) in self.pending.iter_mut().enumerate() {
            let generation = self.state.generation(index);
            if self.pending_generation[index] != generation {
                pending.clear();
                self.pending_generation[index] = generation;
            }
        }
        self.inbox.drain_into(&mut self.pending);
        let table = self.state.load();
        let any_solo = table.any_solo();

        self.mix.reshape(channels, frames);
        self.mix.clear();
        self.silence.reshape(channels, frames);
        self.silence.clear();

        for (index, entry) in table.slots.iter().enumerate() {
            let Some(slot) = entry else {
                self.pending[index].clear();
                continue;
            };
            let audible = slot.is_audible(any_solo);

            let Some(mut instrument) = slot.instrument.try_lock() else {
                // Events stay pending for the next block.
                self.faults.send_lossy(RenderFault::slot(index, FaultKind::Busy));
                continue;
            };

            // Delivered even when inaudible so the instrument tracks note state.
            let mut rejected = false;
            for event in self.pending[index].drain(..) {
                rejected |= instrument.send_event(&event).is_err();
            }
            if rejected {
                self.faults
                    .send_lossy(RenderFault::slot(index, FaultKind::EventRejected));
            }

            let out_channels = instrument.output_channels(channels);
            self.slot_buf.reshape(out_channels, frames);
            self.slot_buf.clear();
            if instrument
                .process(&self.silence, &mut self.slot_buf, sample_rate)
                .is_err()
            {
                self.faults.send_lossy(RenderFault::slot(index, FaultKind::Render));
                continue;
            }
            drop(instrument);

            if !audible {
                continue;
            }

            let chain = run_chain(
                &slot.effects,
                &mut self.slot_buf,
                &mut self.fx_buf,
                sample_rate,
            );
            if let Err((fx, kind)) = chain {
                let kind = match kind {
                    FaultKind::Busy => FaultKind::Busy,
                    _ => FaultKind::Effect { index: fx },
                };
                self.faults.send_lossy(RenderFault::slot(index, kind));
                continue;
            }

            accumulate(&mut self.mix, &self.slot_buf, slot.gain);
        }

        if !table.master.effects.is_empty() {
            let chain = run_chain(
                &table.master.effects,
                &mut self.mix,
                &mut self.fx_buf,
                sample_rate,
            );
            if let Err((fx, _)) = chain {
                self.faults.send_lossy(RenderFault::master(fx));
                self.mix.reshape(channels, frames);
                self.mix.clear();
            } else if self.mix.channels() != channels {
                // Master effects may change the channel count; fold back.
                std::mem::swap(&mut self.mix, &mut self.fx_buf);
                self.mix.reshape(channels, frames);
                self.mix.clear();
                accumulate(&mut self.mix, &self.fx_buf, 1.0);
            }
        }

        let master_gain = table.master.gain;
        for samples in self.mix.iter_mut() {
            for sample in samples.iter_mut() {
                *sample = (*sample * master_gain).clamp(-1.0, 1.0);
            }
        }

        &self.mix
    }
}

/// Runs `buf` through an effect chain in order, leaving the result in `buf`.
///
/// On failure returns the position of the failing effect and why it failed.
fn run_chain(
    effects: &[SharedPlugin],
    buf: &mut AudioBlock,
    scratch: &mut AudioBlock,
    sample_rate: f32,
) -> Result<(), (usize, FaultKind)> {
    for (position, effect) in effects.iter().enumerate() {
        let Some(mut fx) = effect.try_lock() else {
            return Err((position, FaultKind::Busy));
        };
        scratch.reshape(fx.output_channels(buf.channels()), buf.frames());
        scratch.clear();
        if fx.process(buf, scratch, sample_rate).is_err() {
            return Err((position, FaultKind::Render));
        }
        std::mem::swap(buf, scratch);
    }
    Ok(())
}

/// Adds `src × gain` into `mix`. Mono sources feed every output channel;
/// sources with more channels than the mix are truncated.
fn accumulate(mix: &mut AudioBlock, src: &AudioBlock, gain: f32) {
    let src_channels = src.channels();
    if src_channels == 0 {
        return;
    }
    for (ch, dst) in mix.iter_mut().enumerate() {
        let source = match src_channels {
            1 => src.channel(0),
            n if ch < n => src.channel(ch),
            _ => continue,
        };
        for (d, s) in dst.iter_mut().zip(source) {
            *d += s * gain;
        }
    }
}
