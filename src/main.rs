//! slotmix - headless eight-slot plugin mixer
//!
//! `slotmix serve` boots the host and the control socket and runs until
//! SIGINT/SIGTERM. `slotmix cli` attaches an interactive prompt to a
//! running server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use slotmix::config::{default_session_path, default_socket_path, HostConfig};
use slotmix::control::{run_interactive, ControlServer};
use slotmix::engine::{AudioDriver, DeviceSelector};
use slotmix::persistence::RestoreOutcome;
use slotmix::Host;

#[derive(Parser)]
#[command(name = "slotmix", version, about = "Headless eight-slot plugin mixer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mixer and the control socket
    Serve(ServeArgs),
    /// Interactive prompt for a running server
    Cli {
        /// Control socket path
        #[arg(long)]
        sock: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    sr: u32,
    /// Buffer size in frames
    #[arg(long, default_value_t = 512)]
    buf: u32,
    /// Initial tempo
    #[arg(long, default_value_t = slotmix::tempo::DEFAULT_BPM)]
    bpm: f64,
    /// Join tempo sync at startup
    #[arg(long)]
    link: bool,
    /// Sequencer MIDI input port index
    #[arg(long)]
    seq_midi: Option<usize>,
    /// Mixer-surface MIDI input port index
    #[arg(long)]
    mix_midi: Option<usize>,
    /// Start audio on this output device (index or name)
    #[arg(long)]
    output: Option<String>,
    /// Audio output driver
    #[arg(long, value_enum, default_value_t = AudioDriver::Cpal)]
    audio_driver: AudioDriver,
    /// Session file
    #[arg(long)]
    session: Option<PathBuf>,
    /// Do not restore the session at startup
    #[arg(long)]
    no_restore: bool,
    /// Control socket path
    #[arg(long)]
    sock: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => serve(args),
        Commands::Cli { sock } => {
            let path = sock.unwrap_or_else(default_socket_path);
            run_interactive(&path).map_err(|e| e.to_string())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve(args: ServeArgs) -> Result<(), String> {
    // Block the signals before any thread starts so they all inherit the mask.
    let signals = block_shutdown_signals()?;

    let config = HostConfig {
        sample_rate: args.sr,
        buffer_size: args.buf,
        bpm: args.bpm,
        driver: args.audio_driver,
        session_path: args.session.unwrap_or_else(default_session_path),
        ..HostConfig::default()
    };
    let host = Arc::new(Host::new(config));

    if !args.no_restore {
        match host.restore_session(None) {
            Ok(RestoreOutcome::Restored(report)) => log::info!(
                "[Session] Restored {} slot(s), {} master effect(s), {} route(s)",
                report.slots,
                report.master_effects,
                report.routes
            ),
            Ok(_) => {}
            Err(e) => log::error!("[Session] Restore failed: {}", e),
        }
    }

    if args.link {
        if let Err(e) = host.enable_link(Some(args.bpm)) {
            log::warn!("[Link] {}", e);
        }
    }
    if let Some(port) = args.seq_midi {
        if let Err(e) = host.open_sequencer_midi(Some(port)) {
            log::warn!("[SEQ MIDI] {}", e);
        }
    }
    if let Some(port) = args.mix_midi {
        if let Err(e) = host.open_mixer_midi(port) {
            log::warn!("[MIDI Mix] {}", e);
        }
    }
    if let Some(output) = args.output.as_deref() {
        match host.start_audio(Some(&DeviceSelector::parse(output))) {
            Ok(device) => log::info!("[Audio] Running on {}", device),
            Err(e) => log::error!("[Audio] {}", e),
        }
    }

    let sock = args.sock.unwrap_or_else(default_socket_path);
    let mut server = ControlServer::start(Arc::clone(&host), sock).map_err(|e| e.to_string())?;
    println!("slotmix ready. Connect with: slotmix cli --sock {}", server.path().display());

    let signal = wait_for_signal(&signals)?;
    log::info!("Received signal {}, shutting down", signal);

    server.shutdown();
    host.shutdown();
    Ok(())
}

fn block_shutdown_signals() -> Result<libc::sigset_t, String> {
    // SAFETY: the set is initialised by sigemptyset before use and only
    // passed to the libc signal functions.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            return Err(format!("pthread_sigmask failed: {}", rc));
        }
        Ok(set)
    }
}

fn wait_for_signal(set: &libc::sigset_t) -> Result<i32, String> {
    let mut signal: libc::c_int = 0;
    // SAFETY: `set` was built by block_shutdown_signals and the signals are
    // blocked in every thread, so sigwait is the only consumer.
    let rc = unsafe { libc::sigwait(set, &mut signal) };
    if rc != 0 {
        return Err(format!("sigwait failed: {}", rc));
    }
    Ok(signal)
}
