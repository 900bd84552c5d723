//! Named plugin parameters.
//!
//! Every plugin exposes an ordered list of [`ParameterInfo`]. Control commands,
//! session persistence and the mixer-surface knobs address parameters by name
//! through this list instead of reflecting on the plugin.

use super::plugin::PluginError;

/// Description of one controllable plugin parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterInfo {
    /// Parameter name, unique within its plugin.
    pub name: String,
    /// Minimum accepted value.
    pub min: f32,
    /// Maximum accepted value.
    pub max: f32,
    /// Value the plugin starts with.
    pub default: f32,
}

impl ParameterInfo {
    /// Creates a new parameter description.
    pub fn new(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default,
        }
    }

    /// Creates a parameter ranging over 0.0 to 1.0.
    pub fn normalized(name: impl Into<String>, default: f32) -> Self {
        Self::new(name, 0.0, 1.0, default)
    }

    /// Creates an on/off parameter stored as 0.0 or 1.0.
    pub fn toggle(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, 0.0, 1.0, if default { 1.0 } else { 0.0 })
    }

    /// Returns true if `value` lies within the parameter's range.
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamps a value to this parameter's valid range.
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    /// Maps a 0.0-1.0 position onto the parameter's range.
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// An ordered parameter list together with current values.
///
/// Built-in plugins keep their parameters in a bank so that name lookup,
/// range checking and value storage live in one place.
#[derive(Clone, Debug, Default)]
pub struct ParameterBank {
    infos: Vec<ParameterInfo>,
    values: Vec<f32>,
}

impl ParameterBank {
    /// Creates a bank with every parameter at its default value.
    pub fn new(infos: Vec<ParameterInfo>) -> Self {
        let values = infos.iter().map(|p| p.default).collect();
        Self { infos, values }
    }

    /// Parameter descriptions in declaration order.
    pub fn infos(&self) -> &[ParameterInfo] {
        &self.infos
    }

    /// Current value at a declaration index.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.values[index]
    }

    /// Current value of a named parameter.
    pub fn get(&self, name: &str) -> Option<f32> {
        find(&self.infos, name).map(|(index, _)| self.values[index])
    }

    /// Sets a named parameter, rejecting unknown names and out-of-range values.
    pub fn set(&mut self, name: &str, value: f32) -> Result<(), PluginError> {
        let (index, info) =
            find(&self.infos, name).ok_or_else(|| PluginError::UnknownParameter(name.to_string()))?;
        if !value.is_finite() || !info.contains(value) {
            return Err(PluginError::OutOfRange {
                name: name.to_string(),
                value,
                min: info.min,
                max: info.max,
            });
        }
        self.values[index] = value;
        Ok(())
    }
}

/// Finds a parameter by name in an ordered parameter list.
pub fn find<'a>(parameters: &'a [ParameterInfo], name: &str) -> Option<(usize, &'a ParameterInfo)> {
    parameters.iter().enumerate().find(|(_, p)| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_clamp() {
        let param = ParameterInfo::new("time", 1.0, 2000.0, 500.0);
        assert_eq!(param.clamp(-10.0), 1.0);
        assert_eq!(param.clamp(50.0), 50.0);
        assert_eq!(param.clamp(5000.0), 2000.0);
    }

    #[test]
    fn test_parameter_denormalize() {
        let param = ParameterInfo::new("cutoff", 20.0, 20020.0, 440.0);
        assert_eq!(param.denormalize(0.0), 20.0);
        assert_eq!(param.denormalize(1.0), 20020.0);
        assert_eq!(param.denormalize(0.5), 10020.0);
        assert_eq!(param.denormalize(2.0), 20020.0);
    }

    #[test]
    fn test_normalized_parameter() {
        let param = ParameterInfo::normalized("mix", 0.5);
        assert_eq!(param.min, 0.0);
        assert_eq!(param.max, 1.0);
        assert!(param.contains(0.5));
        assert!(!param.contains(1.5));
    }

    #[test]
    fn test_toggle_parameter() {
        assert_eq!(ParameterInfo::toggle("bypass", false).default, 0.0);
        assert_eq!(ParameterInfo::toggle("bypass", true).default, 1.0);
    }

    #[test]
    fn test_bank_set_validates() {
        let mut bank = ParameterBank::new(vec![ParameterInfo::new("time", 1.0, 2000.0, 500.0)]);
        assert_eq!(bank.get("time"), Some(500.0));

        bank.set("time", 250.0).unwrap();
        assert_eq!(bank.value(0), 250.0);

        assert!(matches!(
            bank.set("time", 5000.0),
            Err(PluginError::OutOfRange { .. })
        ));
        assert!(matches!(
            bank.set("feedback", 0.5),
            Err(PluginError::UnknownParameter(_))
        ));
        assert_eq!(bank.get("time"), Some(250.0));
    }

    #[test]
    fn test_find_by_name() {
        let params = vec![
            ParameterInfo::normalized("level", 0.5),
            ParameterInfo::new("release", 0.001, 5.0, 0.2),
        ];
        let (index, info) = find(&params, "release").unwrap();
        assert_eq!(index, 1);
        assert_eq!(info.max, 5.0);
        assert!(find(&params, "missing").is_none());
    }
}
