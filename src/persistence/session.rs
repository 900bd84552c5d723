//! Session save/restore.
//!
//! A session captures everything that can be rebuilt without hardware:
//! loaded instruments and effects with their parameter values, slot gains
//! and flags, master gain, channel routing and tempo. Audio devices and MIDI
//! ports are never part of a session.
//!
//! Slots and channels are stored 1-based so the file reads the same as the
//! control commands.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::plugin::parameter_values;
use crate::dsp::SharedPlugin;
use crate::engine::{EffectTarget, MixTable, StreamSettings, DEFAULT_SLOT_GAIN, NUM_SLOTS};
use crate::host::{Host, ParamTarget};

/// Current session format version.
pub const SESSION_VERSION: u64 = 1;

/// Errors reading or writing a session file.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid session file: {0}")]
    Json(#[from] serde_json::Error),
}

/// The on-disk session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    pub version: u64,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub buffer_size: Option<u32>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub master_gain: Option<f32>,
    /// Channel (1-16, as a string key) to slot (1-8).
    #[serde(default)]
    pub routing: BTreeMap<String, usize>,
    /// One entry per slot, `null` for empty slots.
    #[serde(default)]
    pub slots: Vec<Option<SlotData>>,
    #[serde(default)]
    pub master_effects: Vec<EffectData>,
}

/// A saved channel slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotData {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_slot_gain")]
    pub gain: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
    #[serde(default)]
    pub effects: Vec<EffectData>,
}

/// A saved effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectData {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
}

fn default_slot_gain() -> f32 {
    DEFAULT_SLOT_GAIN
}

impl EffectData {
    fn capture(effect: &SharedPlugin) -> Self {
        let params = parameter_values(&**effect.lock());
        Self {
            path: effect.path().to_string(),
            name: Some(effect.name().to_string()),
            params,
        }
    }
}

impl SessionFile {
    /// Captures the restorable state of a mix table.
    pub fn capture(table: &MixTable, settings: StreamSettings, bpm: f64) -> Self {
        let slots = table
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|slot| SlotData {
                    path: slot.source_path.clone(),
                    name: Some(slot.name.clone()),
                    gain: slot.gain,
                    muted: slot.muted,
                    solo: slot.solo,
                    params: parameter_values(&**slot.instrument.lock()),
                    effects: slot.effects.iter().map(EffectData::capture).collect(),
                })
            })
            .collect();

        let routing = table
            .routing
            .entries()
            .map(|(channel, slot)| ((channel + 1).to_string(), slot + 1))
            .collect();

        Self {
            version: SESSION_VERSION,
            sample_rate: Some(settings.sample_rate),
            buffer_size: Some(settings.buffer_size),
            bpm: Some(bpm),
            master_gain: Some(table.master.gain),
            routing,
            slots,
            master_effects: table.master.effects.iter().map(EffectData::capture).collect(),
        }
    }
}

/// Result of a restore that found a readable file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub slots: usize,
    pub master_effects: usize,
    pub routes: usize,
    /// Every step that failed, in order.
    pub errors: Vec<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What [`restore`] found.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// No session file at the path.
    Missing,
    /// The file has a version this build cannot read; nothing was changed.
    UnsupportedVersion(u64),
    Restored(RestoreReport),
}

/// Writes a session as pretty JSON, creating parent directories.
pub fn save_to_file(session: &SessionFile, path: &Path) -> Result<(), SessionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut json = serde_json::to_string_pretty(session)?;
    json.push('\n');
    std::fs::write(path, json)?;
    log::info!("[Session] Saved to {}", path.display());
    Ok(())
}

/// Reads a session file.
///
/// Returns `Ok(None)` when the version is not supported, without parsing the
/// rest of the document.
pub fn load_from_file(path: &Path) -> Result<Option<SessionFile>, SessionError> {
    Ok(read_versioned(path)?.ok())
}

/// Parses a session, or returns the unsupported version number.
fn read_versioned(path: &Path) -> Result<Result<SessionFile, u64>, SessionError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
    if version != SESSION_VERSION {
        return Ok(Err(version));
    }
    Ok(Ok(serde_json::from_value(value)?))
}

/// Reads `path` and applies it to `host`.
pub fn restore(host: &Host, path: &Path) -> Result<RestoreOutcome, SessionError> {
    if !path.exists() {
        log::info!("[Session] No session file at {}", path.display());
        return Ok(RestoreOutcome::Missing);
    }

    let session = match read_versioned(path)? {
        Ok(session) => session,
        Err(version) => {
            log::warn!("[Session] Unknown session version {}, skipping", version);
            return Ok(RestoreOutcome::UnsupportedVersion(version));
        }
    };

    let report = apply(host, &session);
    if report.is_clean() {
        log::info!("[Session] Restored from {}", path.display());
    } else {
        log::warn!("[Session] Restored with {} error(s):", report.errors.len());
        for err in &report.errors {
            log::warn!("  - {}", err);
        }
    }
    Ok(RestoreOutcome::Restored(report))
}

/// Applies a session to a host, best effort.
///
/// Order: tempo, master gain, slots (instrument, mix settings, parameters,
/// effects), master effects, routing. A failed step is recorded and the
/// rest continues.
pub fn apply(host: &Host, session: &SessionFile) -> RestoreReport {
    let mut report = RestoreReport::default();

    if let Some(bpm) = session.bpm {
        if let Err(e) = host.set_bpm(bpm) {
            report.errors.push(format!("bpm {}: {}", bpm, e));
        }
    }

    if let Some(gain) = session.master_gain {
        host.set_master_gain(gain);
    }

    for (index, data) in session.slots.iter().enumerate().take(NUM_SLOTS) {
        let Some(data) = data else { continue };
        if data.path.is_empty() {
            continue;
        }
        if let Err(e) = restore_slot(host, index, data, &mut report.errors) {
            report.errors.push(format!("slot {} '{}': {}", index + 1, data.path, e));
            continue;
        }
        report.slots += 1;
    }

    for data in &session.master_effects {
        match restore_effect(host, EffectTarget::Master, data, &mut report.errors) {
            Ok(()) => report.master_effects += 1,
            Err(e) => report
                .errors
                .push(format!("master fx '{}': {}", data.path, e)),
        }
    }

    for (channel, slot) in &session.routing {
        let routed = channel
            .parse::<u8>()
            .ok()
            .filter(|&c| c >= 1)
            .zip(Some(*slot).filter(|&s| s >= 1))
            .ok_or_else(|| String::from("invalid channel or slot"))
            .and_then(|(c, s)| host.route(c - 1, s - 1).map_err(|e| e.to_string()));
        match routed {
            Ok(()) => report.routes += 1,
            Err(e) => report
                .errors
                .push(format!("route ch {} -> slot {}: {}", channel, slot, e)),
        }
    }

    report
}

fn restore_slot(
    host: &Host,
    index: usize,
    data: &SlotData,
    errors: &mut Vec<String>,
) -> Result<(), crate::host::HostError> {
    let name = host.load_instrument(index, &data.path, data.name.as_deref())?;
    let state = host.state();
    state.set_gain(index, data.gain)?;
    state.set_muted(index, data.muted)?;
    state.set_solo(index, data.solo)?;
    apply_params(host, ParamTarget::Instrument(index), &data.params, errors);
    log::info!("[Session] slot {}: {}", index + 1, name);

    for fx in &data.effects {
        if let Err(e) = restore_effect(host, EffectTarget::Slot(index), fx, errors) {
            errors.push(format!("slot {} fx '{}': {}", index + 1, fx.path, e));
        }
    }
    Ok(())
}

fn restore_effect(
    host: &Host,
    target: EffectTarget,
    data: &EffectData,
    errors: &mut Vec<String>,
) -> Result<(), crate::host::HostError> {
    let position = host.load_effect(&data.path, target, data.name.as_deref())?;
    let param_target = match target {
        EffectTarget::Slot(slot) => ParamTarget::SlotEffect { slot, index: position },
        EffectTarget::Master => ParamTarget::MasterEffect(position),
    };
    apply_params(host, param_target, &data.params, errors);
    Ok(())
}

fn apply_params(
    host: &Host,
    target: ParamTarget,
    params: &BTreeMap<String, f32>,
    errors: &mut Vec<String>,
) {
    for (name, value) in params {
        if let Err(e) = host.set_parameter(target, name, *value) {
            log::warn!("[Session] Could not restore param '{}' = {}", name, value);
            errors.push(format!("{} param '{}' = {}: {}", target, name, value, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_document() {
        let json = r#"{"version": 1}"#;
        let session: SessionFile = serde_json::from_str(json).unwrap();
        assert_eq!(session.version, 1);
        assert!(session.slots.is_empty());
        assert!(session.routing.is_empty());
        assert_eq!(session.bpm, None);
    }

    #[test]
    fn test_slot_defaults() {
        let json = r#"{"path": "builtin:sine"}"#;
        let slot: SlotData = serde_json::from_str(json).unwrap();
        assert_eq!(slot.gain, DEFAULT_SLOT_GAIN);
        assert!(!slot.muted);
        assert!(!slot.solo);
        assert!(slot.effects.is_empty());
    }

    #[test]
    fn test_keys_are_camel_case() {
        let session = SessionFile {
            version: SESSION_VERSION,
            sample_rate: Some(48000),
            buffer_size: Some(256),
            bpm: Some(120.0),
            master_gain: Some(1.0),
            routing: BTreeMap::from([(String::from("5"), 1)]),
            slots: vec![None],
            master_effects: Vec::new(),
        };
        let value = serde_json::to_value(&session).unwrap();
        for key in [
            "version",
            "sampleRate",
            "bufferSize",
            "bpm",
            "masterGain",
            "routing",
            "slots",
            "masterEffects",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(value["routing"]["5"], 1);
        assert!(value["slots"][0].is_null());
    }

    #[test]
    fn test_save_creates_parent_dirs_and_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let session: SessionFile = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        save_to_file(&session, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("}\n"));
        assert_eq!(load_from_file(&path).unwrap(), Some(session));
    }

    #[test]
    fn test_unknown_version_not_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"version": 7, "slots": "not a list"}"#).unwrap();
        assert_eq!(load_from_file(&path).unwrap(), None);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_from_file(&path), Err(SessionError::Json(_))));
    }
}
