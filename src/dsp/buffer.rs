//! Planar audio buffers passed to and from plugins.
//!
//! A block stores one `Vec<f32>` per channel. Reshaping keeps the existing
//! allocations so the audio thread only allocates when a block grows past
//! anything it has seen before.

/// A planar block of audio samples (`channels × frames`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioBlock {
    /// One sample vector per channel. Every channel holds `frames` samples.
    data: Vec<Vec<f32>>,
    /// Number of valid frames in each channel.
    frames: usize,
}

impl AudioBlock {
    /// Creates a silent block with the given shape.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            data: vec![vec![0.0; frames]; channels],
            frames,
        }
    }

    /// Builds a block from per-channel sample vectors.
    ///
    /// Channels shorter than the longest one are padded with silence.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        let data = channels
            .into_iter()
            .map(|mut ch| {
                ch.resize(frames, 0.0);
                ch
            })
            .collect();
        Self { data, frames }
    }

    /// Number of channels.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.len()
    }

    /// Number of frames per channel.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of one channel.
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index][..self.frames]
    }

    /// Mutable samples of one channel.
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.data[index][..frames]
    }

    /// Iterates over all channels.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.iter().map(move |ch| &ch[..self.frames])
    }

    /// Iterates mutably over all channels.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let frames = self.frames;
        self.data.iter_mut().map(move |ch| &mut ch[..frames])
    }

    /// Changes the shape of the block, reusing existing allocations.
    ///
    /// Sample contents after a reshape are unspecified; call [`clear`](Self::clear)
    /// when silence is required.
    pub fn reshape(&mut self, channels: usize, frames: usize) {
        if self.data.len() != channels {
            self.data.resize_with(channels, Vec::new);
        }
        for ch in &mut self.data {
            if ch.len() < frames {
                ch.resize(frames, 0.0);
            }
        }
        self.frames = frames;
    }

    /// Sets every sample to zero.
    pub fn clear(&mut self) {
        for ch in self.iter_mut() {
            ch.fill(0.0);
        }
    }

    /// Returns the largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    /// Returns true if every sample is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.iter().all(|ch| ch.iter().all(|&s| s == 0.0))
    }
}
