//! Control command dispatch.
//!
//! [`dispatch`] runs one text command against a [`Host`] and returns the
//! text the client should see. It keeps no state between calls; the server
//! serializes calls with its command lock.
//!
//! Slots (1-8) and MIDI channels (1-16) are 1-based here and 0-based
//! everywhere else.

use std::path::Path;
use std::time::Duration;

use crate::dsp::ParameterInfo;
use crate::engine::{DeviceSelector, EffectTarget, StateError, NUM_CHANNELS, NUM_SLOTS};
use crate::host::{Host, HostError, ParamTarget, DEFAULT_NOTE_DURATION, DEFAULT_NOTE_VELOCITY};
use crate::persistence::RestoreOutcome;

/// Sent to each client when it connects.
pub const BANNER: &str = "\
============================================================
  slotmix  -  headless eight-slot plugin mixer
  sequencer input  |  mixer surface  |  socket control
============================================================
Type 'help' for available commands.
Slots are numbered 1-8.  MIDI channels are numbered 1-16.";

/// Result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Text for the client, possibly empty.
    pub output: String,
    /// The client asked to disconnect.
    pub disconnect: bool,
}

/// Why a command produced no effect.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Wrong number of arguments; the text is the usage line.
    #[error("{0}")]
    Usage(&'static str),
    /// A malformed argument.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl From<StateError> for CommandError {
    fn from(err: StateError) -> Self {
        CommandError::Host(err.into())
    }
}

type CommandResult = Result<(), CommandError>;
type Handler = fn(&Host, &str, &mut Output) -> CommandResult;

/// Collected command output.
#[derive(Default)]
struct Output(String);

impl Output {
    fn line(&mut self, text: impl AsRef<str>) {
        self.0.push_str(text.as_ref());
        self.0.push('\n');
    }
}

struct Command {
    name: &'static str,
    help: &'static str,
    handler: Handler,
}

const COMMANDS: &[Command] = &[
    Command { name: "load", help: "Load instrument: load <slot 1-8> <path> [name]", handler: cmd_load },
    Command { name: "unload", help: "Empty a slot: unload <slot 1-8>", handler: cmd_unload },
    Command { name: "load_fx", help: "Load effect: load_fx <path> [slot 1-8|master] [name]", handler: cmd_load_fx },
    Command { name: "remove_fx", help: "Remove effect: remove_fx <slot 1-8|master> <fx_index>", handler: cmd_remove_fx },
    Command { name: "slots", help: "Show all 8 instrument slots.", handler: cmd_slots },
    Command { name: "params", help: "Show params: params <slot 1-8> | params master <fx_index> | params <slot 1-8> fx <fx_index>", handler: cmd_params },
    Command { name: "set", help: "Set param: set <slot 1-8> <name> <value> | set <slot 1-8> fx <fx_index> <name> <value> | set master <fx_index> <name> <value>", handler: cmd_set },
    Command { name: "gain", help: "Set slot gain: gain <slot 1-8> <value>", handler: cmd_gain },
    Command { name: "mute", help: "Toggle mute: mute <slot 1-8>", handler: cmd_mute },
    Command { name: "solo", help: "Toggle solo: solo <slot 1-8>", handler: cmd_solo },
    Command { name: "master", help: "Get/set master gain: master [value]", handler: cmd_master },
    Command { name: "route", help: "Route MIDI channel to slot: route <ch 1-16> <slot 1-8>", handler: cmd_route },
    Command { name: "unroute", help: "Unroute MIDI channel: unroute <ch 1-16>", handler: cmd_unroute },
    Command { name: "routing", help: "Show MIDI routing.", handler: cmd_routing },
    Command { name: "audio_start", help: "Start audio: audio_start [device index|name]", handler: cmd_audio_start },
    Command { name: "audio_stop", help: "Stop audio.", handler: cmd_audio_stop },
    Command { name: "devices", help: "List audio output devices.", handler: cmd_devices },
    Command { name: "midi_ports", help: "List MIDI input ports.", handler: cmd_midi_ports },
    Command { name: "midi_seq", help: "Open sequencer MIDI: midi_seq [port_index] (virtual port if omitted)", handler: cmd_midi_seq },
    Command { name: "midi_mix", help: "Open mixer-surface MIDI: midi_mix <port_index>", handler: cmd_midi_mix },
    Command { name: "note", help: "Test note: note <slot 1-8> <note> [velocity] [dur_ms]", handler: cmd_note },
    Command { name: "link", help: "Enable tempo sync: link [bpm]", handler: cmd_link },
    Command { name: "unlink", help: "Disable tempo sync.", handler: cmd_unlink },
    Command { name: "tempo", help: "Get/set tempo: tempo [bpm]", handler: cmd_tempo },
    Command { name: "save", help: "Save session: save [path]", handler: cmd_save },
    Command { name: "restore", help: "Restore session: restore [path]", handler: cmd_restore },
    Command { name: "status", help: "Overall status.", handler: cmd_status },
    Command { name: "deps", help: "Check optional subsystems.", handler: cmd_deps },
    Command { name: "help", help: "List commands: help [command]", handler: cmd_help },
];

/// Commands that end the client's session.
const DISCONNECT: &[&str] = &["quit", "exit", "disconnect", "EOF"];

/// Runs one command line.
pub fn dispatch(host: &Host, line: &str) -> CommandOutcome {
    let line = line.trim();
    if line.is_empty() {
        return CommandOutcome::default();
    }

    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    };

    if DISCONNECT.contains(&name) {
        return CommandOutcome {
            output: String::new(),
            disconnect: true,
        };
    }

    let mut out = Output::default();
    match COMMANDS.iter().find(|c| c.name == name) {
        Some(command) => match (command.handler)(host, args, &mut out) {
            Ok(()) => {}
            Err(CommandError::Usage(usage)) => out.line(usage),
            Err(e) => out.line(format!("Error: {}", e)),
        },
        None => out.line(format!("*** Unknown syntax: {}", line)),
    }

    CommandOutcome {
        output: out.0,
        disconnect: false,
    }
}

// -- argument parsing --------------------------------------------------------

/// Splits into at most `max` whitespace-separated parts; the last keeps its spaces.
fn split_max(args: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::with_capacity(max);
    let mut rest = args.trim();
    while !rest.is_empty() {
        if parts.len() + 1 == max {
            parts.push(rest);
            break;
        }
        match rest.split_once(char::is_whitespace) {
            Some((head, tail)) => {
                parts.push(head);
                rest = tail.trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

fn parse_slot(text: &str) -> Result<usize, CommandError> {
    match text.parse::<usize>() {
        Ok(n) if (1..=NUM_SLOTS).contains(&n) => Ok(n - 1),
        _ => Err(StateError::InvalidSlot.into()),
    }
}

fn parse_channel(text: &str) -> Result<u8, CommandError> {
    match text.parse::<u8>() {
        Ok(n) if (1..=NUM_CHANNELS).contains(&n) => Ok(n - 1),
        _ => Err(StateError::InvalidChannel.into()),
    }
}

/// Parses a 1-based effect index.
fn parse_fx_index(text: &str) -> Result<usize, CommandError> {
    let index: i64 = text
        .parse()
        .map_err(|_| CommandError::Invalid("fx_index must be a positive integer".into()))?;
    if index < 1 {
        return Err(CommandError::Invalid("fx_index must be >= 1".into()));
    }
    Ok(index as usize - 1)
}

fn parse_target(text: &str) -> Result<EffectTarget, CommandError> {
    if text == "master" {
        Ok(EffectTarget::Master)
    } else {
        parse_slot(text).map(EffectTarget::Slot)
    }
}

fn parse_number(text: &str, what: &str) -> Result<f32, CommandError> {
    text.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::Invalid(format!("{} must be a number", what)))
}

/// Numbers, or `true`/`false` as 1/0.
fn parse_param_value(text: &str) -> Result<f32, CommandError> {
    match text.to_ascii_lowercase().as_str() {
        "true" => Ok(1.0),
        "false" => Ok(0.0),
        _ => parse_number(text, "value"),
    }
}

fn optional_path(args: &str) -> Option<&Path> {
    (!args.is_empty()).then(|| Path::new(args))
}

// -- plugins -----------------------------------------------------------------

fn cmd_load(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts = split_max(args, 3);
    if parts.len() < 2 {
        return Err(CommandError::Usage("Usage: load <slot 1-8> <path> [name]"));
    }
    let slot = parse_slot(parts[0])?;
    let name = host.load_instrument(slot, parts[1], parts.get(2).copied())?;
    out.line(format!("  slot {} = {}", slot + 1, name));
    Ok(())
}

fn cmd_unload(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    if args.is_empty() {
        return Err(CommandError::Usage("Usage: unload <slot 1-8>"));
    }
    let slot = parse_slot(args)?;
    match host.unload(slot)? {
        Some(name) => out.line(format!("  slot {} unloaded ({})", slot + 1, name)),
        None => out.line(format!("  slot {} already empty", slot + 1)),
    }
    Ok(())
}

fn cmd_load_fx(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts = split_max(args, 3);
    if parts.is_empty() {
        return Err(CommandError::Usage(
            "Usage: load_fx <path> [slot 1-8|master] [name]",
        ));
    }
    let target = parse_target(parts.get(1).copied().unwrap_or("master"))?;
    let position = host.load_effect(parts[0], target, parts.get(2).copied())?;
    let added = match target {
        EffectTarget::Slot(slot) => ParamTarget::SlotEffect {
            slot,
            index: position,
        },
        EffectTarget::Master => ParamTarget::MasterEffect(position),
    };
    let label = match parts.get(2) {
        Some(name) => name.to_string(),
        None => host.plugin(added)?.name().to_string(),
    };
    match target {
        EffectTarget::Slot(slot) => {
            out.line(format!("  slot {} fx[{}] = {}", slot + 1, position + 1, label))
        }
        EffectTarget::Master => out.line(format!("  master fx[{}] = {}", position + 1, label)),
    }
    Ok(())
}

fn cmd_remove_fx(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(CommandError::Usage(
            "Usage: remove_fx <slot 1-8|master> <fx_index>",
        ));
    }
    let target = parse_target(parts[0])?;
    let index = parse_fx_index(parts[1])?;
    host.remove_effect(target, index)?;
    out.line("  Removed.");
    Ok(())
}

fn cmd_slots(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    write_slots(host, out);
    Ok(())
}

fn write_slots(host: &Host, out: &mut Output) {
    let table = host.state().snapshot();
    let any_solo = table.any_solo();

    for (i, slot) in table.slots.iter().enumerate() {
        let Some(slot) = slot else {
            out.line(format!("  [{}] (empty)", i + 1));
            continue;
        };
        let mut flags = String::new();
        if slot.muted {
            flags.push('M');
        }
        if slot.solo {
            flags.push('S');
        }
        let channels = if slot.routed_channels.is_empty() {
            String::from("-")
        } else {
            slot.routed_channels
                .iter()
                .map(|c| (c + 1).to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mark = if slot.is_audible(any_solo) { ' ' } else { 'x' };
        out.line(format!(
            "  [{}] {} {:<20} ch={:<8} gain={:.2}  {}",
            i + 1,
            mark,
            slot.name,
            channels,
            slot.gain,
            flags
        ));
        for (j, fx) in slot.effects.iter().enumerate() {
            out.line(format!("        fx[{}] {}", j + 1, fx.name()));
        }
    }

    if !table.master.effects.is_empty() {
        out.line("  master bus:");
        for (j, fx) in table.master.effects.iter().enumerate() {
            out.line(format!("    fx[{}] {}", j + 1, fx.name()));
        }
    }
    out.line(format!("  master gain: {:.2}", table.master.gain));
}

fn cmd_params(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let target = match parts.as_slice() {
        [] => {
            return Err(CommandError::Usage(
                "Usage: params <slot 1-8> | params master <fx_index> | params <slot 1-8> fx <fx_index>",
            ))
        }
        ["master", rest @ ..] => {
            if rest.len() > 1 {
                return Err(CommandError::Usage("Usage: params master <fx_index>"));
            }
            if host.state().load().master.effects.is_empty() {
                out.line("  No master effects loaded");
                return Ok(());
            }
            let index = rest.first().map_or(Ok(0), |t| parse_fx_index(t))?;
            ParamTarget::MasterEffect(index)
        }
        [slot, rest @ ..] => {
            let slot = parse_slot(slot)?;
            if host.state().load().slot(slot).is_none() {
                out.line("  Empty slot");
                return Ok(());
            }
            match rest {
                [] => ParamTarget::Instrument(slot),
                ["fx", index] => ParamTarget::SlotEffect {
                    slot,
                    index: parse_fx_index(index)?,
                },
                _ => {
                    return Err(CommandError::Usage(
                        "Usage: params <slot 1-8> [fx <fx_index>]",
                    ))
                }
            }
        }
    };

    for (info, value) in host.parameters(target)? {
        out.line(format_param(&info, value));
    }
    Ok(())
}

fn format_param(info: &ParameterInfo, value: Option<f32>) -> String {
    match value {
        Some(value) => format!(
            "  {} = {:?}  (range {:.3} .. {:.3})",
            info.name, value, info.min, info.max
        ),
        None => format!("  {} = ???", info.name),
    }
}

fn cmd_set(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (target, name, value) = match parts.as_slice() {
        [] => return Err(CommandError::Usage("Usage: set <slot 1-8> <name> <value>")),
        ["master", rest @ ..] => {
            let [index, name, value, ..] = rest else {
                return Err(CommandError::Usage(
                    "Usage: set master <fx_index> <name> <value>",
                ));
            };
            (ParamTarget::MasterEffect(parse_fx_index(index)?), *name, *value)
        }
        [slot, "fx", rest @ ..] => {
            let [index, name, value, ..] = rest else {
                return Err(CommandError::Usage(
                    "Usage: set <slot 1-8> fx <fx_index> <name> <value>",
                ));
            };
            let slot = parse_slot(slot)?;
            if host.state().load().slot(slot).is_none() {
                out.line("  Empty slot");
                return Ok(());
            }
            let index = parse_fx_index(index)?;
            (ParamTarget::SlotEffect { slot, index }, *name, *value)
        }
        [slot, name, value, ..] => {
            let slot = parse_slot(slot)?;
            if host.state().load().slot(slot).is_none() {
                out.line("  Empty slot");
                return Ok(());
            }
            (ParamTarget::Instrument(slot), *name, *value)
        }
        _ => return Err(CommandError::Usage("Usage: set <slot 1-8> <name> <value>")),
    };

    let value = parse_param_value(value)?;
    host.set_parameter(target, name, value)?;
    out.line(format!("  {} = {:?}", name, value));
    Ok(())
}

// -- gain / mute / solo ------------------------------------------------------

fn cmd_gain(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(CommandError::Usage("Usage: gain <slot 1-8> <value>"));
    }
    let slot = parse_slot(parts[0])?;
    let gain = parse_number(parts[1], "gain")?;
    host.set_gain(slot, gain)?;
    out.line(format!("  gain = {:.2}", gain));
    Ok(())
}

fn cmd_mute(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let slot = parse_slot(args)?;
    let (name, muted) = host.toggle_mute(slot)?;
    out.line(format!("  {}: {}", name, if muted { "MUTED" } else { "unmuted" }));
    Ok(())
}

fn cmd_solo(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let slot = parse_slot(args)?;
    let (name, solo) = host.toggle_solo(slot)?;
    out.line(format!("  {}: {}", name, if solo { "SOLO" } else { "unsolo" }));
    Ok(())
}

fn cmd_master(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    if !args.is_empty() {
        host.set_master_gain(parse_number(args, "master gain")?);
    }
    out.line(format!("  master gain = {:.2}", host.master_gain()));
    Ok(())
}

// -- routing -----------------------------------------------------------------

fn cmd_route(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(CommandError::Usage("Usage: route <channel 1-16> <slot 1-8>"));
    }
    let channel = parse_channel(parts[0])?;
    let slot = parse_slot(parts[1])?;
    host.route(channel, slot)?;
    out.line(format!("  ch {} -> slot {}", channel + 1, slot + 1));
    Ok(())
}

fn cmd_unroute(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let channel = parse_channel(args)?;
    if let Some(slot) = host.unroute(channel) {
        out.line(format!("  ch {} unrouted (was slot {})", channel + 1, slot + 1));
    }
    Ok(())
}

fn cmd_routing(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    let table = host.state().snapshot();
    if table.routing.is_empty() {
        out.line("  No routes.");
        return Ok(());
    }
    for (channel, slot) in table.routing.entries() {
        let name = table.slot(slot).map_or("(empty)", |s| s.name.as_str());
        out.line(format!("  ch {} -> slot {} ({})", channel + 1, slot + 1, name));
    }
    Ok(())
}

// -- audio -------------------------------------------------------------------

fn cmd_audio_start(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let selector = (!args.is_empty()).then(|| DeviceSelector::parse(args));
    let device = host.start_audio(selector.as_ref())?;
    out.line(format!("  Audio running on {}", device));
    Ok(())
}

fn cmd_audio_stop(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    host.stop_audio();
    out.line("  Audio stopped.");
    Ok(())
}

fn cmd_devices(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    let devices = host.audio_devices()?;
    if devices.is_empty() {
        out.line("  No output devices found.");
    }
    for device in devices {
        let default = if device.is_default { "  (default)" } else { "" };
        out.line(format!("  [{}] {}{}", device.index, device.name, default));
    }
    Ok(())
}

// -- MIDI --------------------------------------------------------------------

fn parse_port(text: &str) -> Result<usize, CommandError> {
    text.parse()
        .map_err(|_| CommandError::Invalid("port_index must be a non-negative integer".into()))
}

fn cmd_midi_ports(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    let ports = host.midi_ports()?;
    if ports.is_empty() {
        out.line("  No MIDI input ports found.");
    }
    for port in ports {
        out.line(format!("  [{}] {}", port.index, port.name));
    }
    Ok(())
}

fn cmd_midi_seq(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let port = if args.is_empty() {
        None
    } else {
        Some(parse_port(args)?)
    };
    let name = host.open_sequencer_midi(port)?;
    out.line(format!("  Sequencer MIDI: {}", name));
    Ok(())
}

fn cmd_midi_mix(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    if args.is_empty() {
        return Err(CommandError::Usage("Usage: midi_mix <port_index>"));
    }
    let name = host.open_mixer_midi(parse_port(args)?)?;
    out.line(format!("  Mixer MIDI: {}", name));
    Ok(())
}

/// Longest note `note` will schedule.
const MAX_NOTE_MS: f64 = 60_000.0;

fn note_duration(ms: f64) -> Result<Duration, CommandError> {
    if !(0.0..=MAX_NOTE_MS).contains(&ms) {
        return Err(CommandError::Invalid(format!(
            "dur_ms must be 0-{}",
            MAX_NOTE_MS
        )));
    }
    Duration::try_from_secs_f64(ms / 1000.0)
        .map_err(|_| CommandError::Invalid("dur_ms must be numeric".into()))
}

fn cmd_note(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(CommandError::Usage(
            "Usage: note <slot 1-8> <note> [velocity] [dur_ms]",
        ));
    }
    let slot = parse_slot(parts[0])?;
    let parsed = (|| {
        let note = parts[1].parse::<u8>().ok()?;
        let velocity = match parts.get(2) {
            Some(v) => v.parse::<u8>().ok()?,
            None => DEFAULT_NOTE_VELOCITY,
        };
        let duration = match parts.get(3) {
            Some(d) => Some(d.parse::<f64>().ok()?),
            None => None,
        };
        Some((note, velocity, duration))
    })();
    let Some((note, velocity, duration_ms)) = parsed else {
        return Err(CommandError::Invalid(
            "note/velocity must be integers, dur_ms must be numeric".into(),
        ));
    };
    let duration = match duration_ms {
        Some(ms) => note_duration(ms)?,
        None => DEFAULT_NOTE_DURATION,
    };
    host.send_note(slot, note, velocity, duration)?;
    out.line(format!(
        "  note {} vel {} -> slot {} ({} ms)",
        note,
        velocity,
        slot + 1,
        duration.as_millis()
    ));
    Ok(())
}

// -- tempo -------------------------------------------------------------------

fn parse_bpm(text: &str) -> Result<f64, CommandError> {
    text.parse::<f64>()
        .map_err(|_| CommandError::Invalid("bpm must be a number".into()))
}

fn cmd_link(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let bpm = if args.is_empty() {
        None
    } else {
        Some(parse_bpm(args)?)
    };
    let bpm = host.enable_link(bpm)?;
    out.line(format!("  Link enabled at {:.1} BPM", bpm));
    Ok(())
}

fn cmd_unlink(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    host.disable_link();
    out.line("  Link disabled");
    Ok(())
}

fn cmd_tempo(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    if !args.is_empty() {
        host.set_bpm(parse_bpm(args)?)?;
    }
    out.line(format!("  {:.1} BPM", host.bpm()));
    Ok(())
}

// -- session -----------------------------------------------------------------

fn cmd_save(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let path = host.save_session(optional_path(args))?;
    out.line(format!("  Saved to {}", path.display()));
    Ok(())
}

fn cmd_restore(host: &Host, args: &str, out: &mut Output) -> CommandResult {
    let path = optional_path(args).unwrap_or(host.session_path()).to_path_buf();
    match host.restore_session(Some(&path))? {
        RestoreOutcome::Missing => {
            out.line(format!("  No session file at {}", path.display()))
        }
        RestoreOutcome::UnsupportedVersion(version) => out.line(format!(
            "  Unknown session version {}, nothing restored",
            version
        )),
        RestoreOutcome::Restored(report) => {
            out.line(format!(
                "  Restored {} slot(s), {} master effect(s), {} route(s) from {}",
                report.slots,
                report.master_effects,
                report.routes,
                path.display()
            ));
            for err in &report.errors {
                out.line(format!("  Error: {}", err));
            }
        }
    }
    Ok(())
}

// -- status ------------------------------------------------------------------

fn cmd_status(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    let settings = host.stream_settings();
    let output = host.audio_output();
    out.line("=== slotmix Status ===");
    out.line(format!(
        "  Audio  : {}  (sr={} buf={})",
        if output.is_some() { "RUNNING" } else { "STOPPED" },
        settings.sample_rate,
        settings.buffer_size
    ));
    if let Some((device, driver)) = output {
        out.line(format!("  Output : {} ({})", device, driver));
    }
    out.line(format!(
        "  Seq    : {}",
        host.sequencer_port().as_deref().unwrap_or("closed")
    ));
    out.line(format!(
        "  Mixer  : {}",
        host.mixer_port().as_deref().unwrap_or("closed")
    ));
    out.line(format!("  Session: {}", host.session_path().display()));
    match host.link_status() {
        Some((bpm, peers)) => out.line(format!("  Link   : {:.1} BPM  ({} peers)", bpm, peers)),
        None => out.line(format!("  Link   : disabled  ({:.1} BPM)", host.bpm())),
    }
    out.line("");
    write_slots(host, out);
    Ok(())
}

fn cmd_deps(host: &Host, _args: &str, out: &mut Output) -> CommandResult {
    for status in host.capabilities() {
        match status.reason {
            None => out.line(format!("  {}: OK ({})", status.subsystem, status.provider)),
            Some(reason) => out.line(format!("  {}: MISSING ({})", status.subsystem, reason)),
        }
    }
    Ok(())
}

fn cmd_help(_host: &Host, args: &str, out: &mut Output) -> CommandResult {
    if !args.is_empty() {
        match COMMANDS.iter().find(|c| c.name == args) {
            Some(command) => out.line(command.help),
            None => out.line(format!("*** No help on {}", args)),
        }
        return Ok(());
    }
    out.line("Commands:");
    for command in COMMANDS {
        out.line(format!("  {:<12} {}", command.name, command.help));
    }
    out.line(format!("  {:<12} Close this client session.", "quit"));
    Ok(())
}
