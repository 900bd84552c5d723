//! Socket protocol tests against a live server with the offline driver.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use slotmix::capability::Capability;
use slotmix::config::HostConfig;
use slotmix::control::{ControlClient, ControlServer, BANNER};
use slotmix::engine::AudioDriver;
use slotmix::modules::BuiltinPlugins;
use slotmix::{Host, Providers};

fn start(dir: &Path) -> (Arc<Host>, ControlServer) {
    let config = HostConfig {
        driver: AudioDriver::Offline,
        session_path: dir.join("session.json"),
        ..HostConfig::default()
    };
    let providers = Providers {
        plugins: Capability::Available(Box::new(BuiltinPlugins::new())),
        midi: Capability::unavailable("midi", "disabled in tests"),
        link: Capability::unavailable("link", "disabled in tests"),
    };
    let host = Arc::new(Host::with_providers(config, providers));
    let server = ControlServer::start(Arc::clone(&host), dir.join("run").join("test.sock")).unwrap();
    (host, server)
}

#[test]
fn test_banner_then_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let (_host, server) = start(dir.path());

    let stream = UnixStream::connect(server.path()).unwrap();
    let mut reader = BufReader::new(stream);
    let mut received = Vec::new();
    loop {
        let mut line = String::new();
        assert!(reader.read_line(&mut line).unwrap() > 0);
        if line == "\0\n" {
            break;
        }
        received.push(line);
    }
    assert_eq!(received.concat(), format!("{}\n", BANNER));
}

#[test]
fn test_commands_and_empty_line() {
    let dir = tempfile::tempdir().unwrap();
    let (host, server) = start(dir.path());
    let mut client = ControlClient::connect(server.path()).unwrap();
    assert!(client.banner().contains("slotmix"));

    assert_eq!(client.send("").unwrap().as_deref(), Some(""));
    assert_eq!(
        client.send("load 1 builtin:sine pad").unwrap().as_deref(),
        Some("  slot 1 = pad\n")
    );
    assert_eq!(
        client.send("bogus").unwrap().as_deref(),
        Some("*** Unknown syntax: bogus\n")
    );
    assert_eq!(
        client.send("gain 9 1").unwrap().as_deref(),
        Some("Error: slot must be 1-8\n")
    );
    assert_eq!(host.state().load().slot(0).unwrap().name, "pad");
}

#[test]
fn test_quit_closes_only_that_client() {
    let dir = tempfile::tempdir().unwrap();
    let (_host, server) = start(dir.path());
    let mut first = ControlClient::connect(server.path()).unwrap();
    let mut second = ControlClient::connect(server.path()).unwrap();

    assert_eq!(
        first.send("quit").unwrap().as_deref(),
        Some("[Host] Disconnected.\n")
    );
    // Either the write fails or the read sees EOF.
    assert!(!matches!(first.send("slots"), Ok(Some(_))));

    let slots = second.send("slots").unwrap().unwrap();
    assert!(slots.starts_with("  [1] (empty)\n"));
}

#[test]
fn test_crlf_lines_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let (_host, server) = start(dir.path());

    let mut stream = UnixStream::connect(server.path()).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut skip_banner = String::new();
    while skip_banner != "\0\n" {
        skip_banner.clear();
        reader.read_line(&mut skip_banner).unwrap();
    }

    stream.write_all(b"master 0.5\r\n").unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "  master gain = 0.50\n");
}

#[test]
fn test_invalid_utf8_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (_host, server) = start(dir.path());

    let mut stream = UnixStream::connect(server.path()).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut read_response = || {
        let mut response = String::new();
        loop {
            let mut line = String::new();
            assert!(reader.read_line(&mut line).unwrap() > 0);
            if line == "\0\n" {
                return response;
            }
            response.push_str(&line);
        }
    };
    read_response();

    stream.write_all(b"gain 1 \xff\n").unwrap();
    assert!(read_response().starts_with("Error: "));

    stream.write_all(b"master\n").unwrap();
    assert_eq!(read_response(), "  master gain = 1.00\n");
}

#[test]
fn test_concurrent_gain_commands_are_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let (host, server) = start(dir.path());
    host.load_instrument(0, "builtin:sine", None).unwrap();

    let values = ["0.10", "0.20", "0.30", "0.40", "0.50", "0.60"];
    let handles: Vec<_> = values
        .iter()
        .map(|value| {
            let path = server.path().to_path_buf();
            let value = value.to_string();
            thread::spawn(move || {
                let mut client = ControlClient::connect(&path).unwrap();
                for _ in 0..20 {
                    let reply = client.send(&format!("gain 1 {}", value)).unwrap();
                    assert_eq!(reply, Some(format!("  gain = {}\n", value)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let gain = host.state().load().slot(0).unwrap().gain;
    assert!(values.iter().any(|v| (v.parse::<f32>().unwrap() - gain).abs() < 1e-6));
}

#[test]
fn test_shutdown_removes_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (_host, mut server) = start(dir.path());
    let path = server.path().to_path_buf();
    assert!(path.exists());
    server.shutdown();
    assert!(!path.exists());
    server.shutdown();
}
