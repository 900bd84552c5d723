//! Stereo feedback delay effect.
//!
//! Each of the first two channels gets its own circular buffer; any further
//! channels pass through dry.

use crate::dsp::{
    AudioBlock, ParameterBank, ParameterInfo, Plugin, PluginError, PluginInfo, PluginKind,
    SmoothedValue,
};

/// Maximum delay time in seconds.
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Channels with their own delay line.
const DELAY_CHANNELS: usize = 2;

/// Stereo delay with feedback and wet/dry mix.
///
/// # Parameters
///
/// - **time_ms** (1-2000 ms): Delay time.
/// - **feedback** (0-0.95): Amount of output fed back to input.
/// - **mix** (0-1): Wet/dry balance.
pub struct StereoDelay {
    info: PluginInfo,
    params: ParameterBank,
    sample_rate: f32,
    /// One circular buffer per delayed channel.
    lines: [Vec<f32>; DELAY_CHANNELS],
    /// Write position in the circular buffers.
    write_pos: usize,
    /// Smoothed delay time in milliseconds.
    time_smooth: SmoothedValue,
    feedback_smooth: SmoothedValue,
    mix_smooth: SmoothedValue,
}

impl StereoDelay {
    const PARAM_TIME: usize = 0;
    const PARAM_FEEDBACK: usize = 1;
    const PARAM_MIX: usize = 2;

    pub fn new(path: &str) -> Self {
        let params = ParameterBank::new(vec![
            ParameterInfo::new("time_ms", 1.0, 2000.0, 350.0),
            ParameterInfo::new("feedback", 0.0, 0.95, 0.4),
            ParameterInfo::normalized("mix", 0.3),
        ]);
        let sample_rate = 44100.0;
        Self {
            info: PluginInfo::from_path(path, PluginKind::Effect),
            time_smooth: SmoothedValue::new(params.value(Self::PARAM_TIME), 50.0, sample_rate),
            feedback_smooth: SmoothedValue::with_default_smoothing(
                params.value(Self::PARAM_FEEDBACK),
                sample_rate,
            ),
            mix_smooth: SmoothedValue::with_default_smoothing(
                params.value(Self::PARAM_MIX),
                sample_rate,
            ),
            params,
            sample_rate,
            lines: Default::default(),
            write_pos: 0,
        }
    }

    /// Reads from a delay line with linear interpolation.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f32) -> f32 {
        let buffer_size = buffer.len();
        let int_delay = delay_samples as usize;
        let frac = delay_samples - int_delay as f32;

        let read_pos_1 = (write_pos + buffer_size - int_delay) % buffer_size;
        let read_pos_2 = (read_pos_1 + buffer_size - 1) % buffer_size;

        let sample_1 = buffer[read_pos_1];
        let sample_2 = buffer[read_pos_2];
        sample_1 + frac * (sample_2 - sample_1)
    }
}

impl Plugin for StereoDelay {
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
        self.time_smooth.set_target(self.params.value(Self::PARAM_TIME));
        self.feedback_smooth
            .set_target(self.params.value(Self::PARAM_FEEDBACK));
        self.mix_smooth.set_target(self.params.value(Self::PARAM_MIX));
        Ok(())
    }

    fn prepare(&mut self, sample_rate: f32, _max_block_size: usize) {
        self.sample_rate = sample_rate;

        let max_samples = (MAX_DELAY_SECONDS * sample_rate) as usize + 2;
        for line in self.lines.iter_mut() {
            line.clear();
            line.resize(max_samples, 0.0);
        }
        self.write_pos = 0;

        self.time_smooth.set_sample_rate(sample_rate);
        self.feedback_smooth.set_sample_rate(sample_rate);
        self.mix_smooth.set_sample_rate(sample_rate);
    }

    fn process(
        &mut self,
        input: &AudioBlock,
        output: &mut AudioBlock,
        _sample_rate: f32,
    ) -> Result<(), PluginError> {
        let buffer_size = self.lines[0].len();
        if buffer_size < 2 {
            return Err(PluginError::Render("delay used before prepare".into()));
        }

        let channels = input.channels().min(output.channels());
        let frames = input.frames().min(output.frames());
        let delayed = channels.min(DELAY_CHANNELS);

        for i in 0..frames {
            let time_ms = self.time_smooth.next();
            let feedback = self.feedback_smooth.next();
            let mix = self.mix_smooth.next();

            let delay_samples =
                (time_ms * 0.001 * self.sample_rate).clamp(1.0, (buffer_size - 1) as f32);

            for ch in 0..delayed {
                let dry = input.channel(ch)[i];
                let wet = Self::read_interpolated(&self.lines[ch], self.write_pos, delay_samples);
                // tanh keeps runaway feedback bounded.
                self.lines[ch][self.write_pos] = (dry + wet * feedback).tanh();
                output.channel_mut(ch)[i] = dry * (1.0 - mix) + wet * mix;
            }
            self.write_pos = (self.write_pos + 1) % buffer_size;
        }

        for ch in delayed..channels {
            output.channel_mut(ch)[..frames].copy_from_slice(&input.channel(ch)[..frames]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn delay(time_ms: f32, feedback: f32, mix: f32) -> StereoDelay {
        let mut delay = StereoDelay::new("builtin:delay");
        delay.set_parameter("time_ms", time_ms).unwrap();
        delay.set_parameter("feedback", feedback).unwrap();
        delay.set_parameter("mix", mix).unwrap();
        delay.prepare(SR, 64);
        delay.time_smooth.set_immediate(time_ms);
        delay.feedback_smooth.set_immediate(feedback);
        delay.mix_smooth.set_immediate(mix);
        delay
    }

    fn impulse(channels: usize, frames: usize) -> AudioBlock {
        let mut block = AudioBlock::new(channels, frames);
        for ch in block.iter_mut() {
            ch[0] = 1.0;
        }
        block
    }

    #[test]
    fn test_impulse_repeats_after_delay_time() {
        // 10 ms at 1 kHz is 10 samples.
        let mut fx = delay(10.0, 0.0, 1.0);
        let input = impulse(2, 32);
        let mut output = AudioBlock::new(2, 32);
        fx.process(&input, &mut output, SR).unwrap();

        for ch in output.iter() {
            assert!(ch[0].abs() < 1e-6);
            assert!((ch[10] - 1.0_f32.tanh()).abs() < 1e-4);
            assert!(ch[20].abs() < 1e-6);
        }
    }

    #[test]
    fn test_dry_mix_is_passthrough() {
        let mut fx = delay(10.0, 0.5, 0.0);
        let input = impulse(2, 16);
        let mut output = AudioBlock::new(2, 16);
        fx.process(&input, &mut output, SR).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_feedback_stays_bounded() {
        let mut fx = delay(1.0, 0.95, 1.0);
        let input = AudioBlock::from_channels(vec![vec![1.0; 256], vec![1.0; 256]]);
        let mut output = AudioBlock::new(2, 256);
        for _ in 0..20 {
            fx.process(&input, &mut output, SR).unwrap();
        }
        assert!(output.peak() <= 1.0);
    }

    #[test]
    fn test_extra_channels_pass_through() {
        let mut fx = delay(10.0, 0.0, 1.0);
        let input = impulse(3, 16);
        let mut output = AudioBlock::new(3, 16);
        fx.process(&input, &mut output, SR).unwrap();
        assert_eq!(output.channel(2), input.channel(2));
    }

    #[test]
    fn test_unprepared_delay_reports_error() {
        let mut fx = StereoDelay::new("builtin:delay");
        let input = impulse(2, 4);
        let mut output = AudioBlock::new(2, 4);
        assert!(fx.process(&input, &mut output, SR).is_err());
    }
}
