//! Session save/restore through the host.

use std::fs;
use std::path::Path;

use slotmix::capability::Capability;
use slotmix::config::HostConfig;
use slotmix::engine::{AudioDriver, EffectTarget};
use slotmix::modules::{BuiltinPlugins, DELAY, GAIN, SINE};
use slotmix::persistence::{RestoreOutcome, SessionFile};
use slotmix::{Host, ParamTarget, Providers};

fn host(session: &Path) -> Host {
    let config = HostConfig {
        driver: AudioDriver::Offline,
        session_path: session.to_path_buf(),
        ..HostConfig::default()
    };
    let providers = Providers {
        plugins: Capability::Available(Box::new(BuiltinPlugins::new())),
        midi: Capability::unavailable("midi", "disabled in tests"),
        link: Capability::unavailable("link", "disabled in tests"),
    };
    Host::with_providers(config, providers)
}

fn restored(outcome: RestoreOutcome) -> slotmix::persistence::RestoreReport {
    match outcome {
        RestoreOutcome::Restored(report) => report,
        other => panic!("expected a restore, got {:?}", other),
    }
}

#[test]
fn test_round_trip_reproduces_mix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");

    let original = host(&path);
    original.load_instrument(0, SINE, Some("bass")).unwrap();
    original.load_instrument(2, SINE, None).unwrap();
    original.set_gain(0, 0.35).unwrap();
    original.toggle_mute(0).unwrap();
    original.toggle_solo(2).unwrap();
    original
        .set_parameter(ParamTarget::Instrument(0), "release", 1.5)
        .unwrap();
    original.load_effect(GAIN, EffectTarget::Slot(0), None).unwrap();
    original
        .set_parameter(ParamTarget::SlotEffect { slot: 0, index: 0 }, "gain", 0.5)
        .unwrap();
    original.load_effect(DELAY, EffectTarget::Master, None).unwrap();
    original
        .set_parameter(ParamTarget::MasterEffect(0), "feedback", 0.6)
        .unwrap();
    original.set_master_gain(0.7);
    original.route(4, 0).unwrap();
    original.route(9, 2).unwrap();
    original.set_bpm(132.0).unwrap();

    assert_eq!(original.save_session(None).unwrap(), path);
    let before = original.snapshot();

    let copy = host(&path);
    let report = restored(copy.restore_session(None).unwrap());
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.slots, 2);
    assert_eq!(report.master_effects, 1);
    assert_eq!(report.routes, 2);

    assert_eq!(copy.snapshot(), before);

    let table = copy.state().load();
    let bass = table.slot(0).unwrap();
    assert_eq!(bass.name, "bass");
    assert_eq!(bass.gain, 0.35);
    assert!(bass.muted);
    assert!(table.slot(2).unwrap().solo);
    assert_eq!(copy.state().lookup_route(4), Some(0));
    assert_eq!(copy.bpm(), 132.0);
}

#[test]
fn test_missing_file_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir.path().join("none.json"));
    assert_eq!(host.restore_session(None).unwrap(), RestoreOutcome::Missing);
    assert!(host.state().load().slots.iter().all(Option::is_none));
}

#[test]
fn test_unknown_version_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(
        &path,
        r#"{"version": 7, "masterGain": 0.1, "slots": [{"path": "builtin:sine"}]}"#,
    )
    .unwrap();

    let host = host(&path);
    assert_eq!(
        host.restore_session(None).unwrap(),
        RestoreOutcome::UnsupportedVersion(7)
    );
    assert!(host.state().load().slot(0).is_none());
    assert_eq!(host.master_gain(), 1.0);
}

#[test]
fn test_failures_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(
        &path,
        r#"{
  "version": 1,
  "routing": {"1": 2, "40": 1},
  "slots": [
    {"path": "builtin:missing"},
    {"path": "builtin:sine", "params": {"level": 0.25, "nope": 1.0},
     "effects": [{"path": "builtin:sine"}]}
  ],
  "masterEffects": [{"path": "builtin:gain", "params": {"gain": 9.0}}]
}
"#,
    )
    .unwrap();

    let host = host(&path);
    let report = restored(host.restore_session(None).unwrap());

    assert_eq!(report.slots, 1);
    assert_eq!(report.master_effects, 1);
    assert_eq!(report.routes, 1);
    // Missing plugin, unknown param, wrong-kind effect, out-of-range param, bad channel.
    assert_eq!(report.errors.len(), 5, "{:?}", report.errors);

    let level = host
        .parameters(ParamTarget::Instrument(1))
        .unwrap()
        .into_iter()
        .find(|(info, _)| info.name == "level")
        .and_then(|(_, value)| value);
    assert_eq!(level, Some(0.25));
    assert_eq!(host.state().lookup_route(0), Some(1));
}

#[test]
fn test_saved_file_is_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let host = host(&path);
    host.load_instrument(1, SINE, None).unwrap();
    host.route(0, 1).unwrap();
    host.save_session(None).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let file: SessionFile = serde_json::from_str(&text).unwrap();
    assert_eq!(file.version, 1);
    assert_eq!(file.routing.get("1"), Some(&2));
    assert!(file.slots[0].is_none());
    assert_eq!(file.slots[1].as_ref().unwrap().path, SINE);
}
