//! Gain effect.
//!
//! Multiplies every channel by a smoothed gain factor.

use crate::dsp::{
    AudioBlock, ParameterBank, ParameterInfo, Plugin, PluginError, PluginInfo, PluginKind,
    SmoothedValue,
};

/// Linear gain stage.
///
/// # Parameters
///
/// - **gain** (0-4): Linear gain factor.
pub struct Gain {
    info: PluginInfo,
    params: ParameterBank,
    gain_smooth: SmoothedValue,
}

impl Gain {
    const PARAM_GAIN: usize = 0;

    pub fn new(path: &str) -> Self {
        let params = ParameterBank::new(vec![ParameterInfo::new("gain", 0.0, 4.0, 1.0)]);
        let gain_smooth =
            SmoothedValue::with_default_smoothing(params.value(Self::PARAM_GAIN), 44100.0);
        Self {
            info: PluginInfo::from_path(path, PluginKind::Effect),
            params,
            gain_smooth,
        }
    }
}

impl Plugin for Gain {
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
        self.gain_smooth.set_target(self.params.value(Self::PARAM_GAIN));
        Ok(())
    }

    fn prepare(&mut self, sample_rate: f32, _max_block_size: usize) {
        self.gain_smooth.set_sample_rate(sample_rate);
        self.gain_smooth
            .set_immediate(self.params.value(Self::PARAM_GAIN));
    }

    fn process(
        &mut self,
        input: &AudioBlock,
        output: &mut AudioBlock,
        _sample_rate: f32,
    ) -> Result<(), PluginError> {
        let channels = input.channels().min(output.channels());
        let frames = input.frames().min(output.frames());

        // The same gain curve applies to every channel, so advance the
        // smoother once per frame.
        for i in 0..frames {
            let gain = self.gain_smooth.next();
            for ch in 0..channels {
                output.channel_mut(ch)[i] = input.channel(ch)[i] * gain;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_by_default() {
        let mut fx = Gain::new("builtin:gain");
        fx.prepare(48000.0, 8);
        let input = AudioBlock::from_channels(vec![vec![0.5; 8], vec![-0.25; 8]]);
        let mut output = AudioBlock::new(2, 8);
        fx.process(&input, &mut output, 48000.0).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_gain_glides_to_target() {
        let mut fx = Gain::new("builtin:gain");
        fx.prepare(48000.0, 4800);
        fx.set_parameter("gain", 2.0).unwrap();
        let input = AudioBlock::from_channels(vec![vec![1.0; 4800]]);
        let mut output = AudioBlock::new(1, 4800);
        fx.process(&input, &mut output, 48000.0).unwrap();

        let out = output.channel(0);
        assert!(out[0] > 1.0 && out[0] < 2.0);
        assert!((out[4799] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_gain_range_enforced() {
        let mut fx = Gain::new("builtin:gain");
        assert!(fx.set_parameter("gain", 5.0).is_err());
        assert_eq!(fx.get_parameter("gain"), Some(1.0));
    }
}
