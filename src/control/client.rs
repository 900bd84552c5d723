//! Interactive client for the control socket.

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use super::server::END_OF_RESPONSE;

const PROMPT: &str = "slotmix> ";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("socket {0} not found. Is the server running?")]
    NotRunning(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A connection to a running server.
pub struct ControlClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    banner: String,
}

impl ControlClient {
    /// Connects and reads the banner.
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                ClientError::NotRunning(path.display().to_string())
            }
            _ => ClientError::Io(e),
        })?;
        let writer = stream.try_clone()?;
        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            banner: String::new(),
        };
        client.banner = client.read_response()?.unwrap_or_default();
        Ok(client)
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Sends one command and returns its response, or `None` once the
    /// server has closed the connection.
    pub fn send(&mut self, line: &str) -> io::Result<Option<String>> {
        self.writer.write_all(line.trim_end_matches('\n').as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.read_response()
    }

    fn read_response(&mut self) -> io::Result<Option<String>> {
        let mut response = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim_end_matches('\n') == END_OF_RESPONSE {
                return Ok(Some(response));
            }
            response.push_str(&line);
        }
    }
}

/// Runs the prompt loop on stdin until EOF, `quit` or a closed connection.
pub fn run_interactive(path: &Path) -> Result<(), ClientError> {
    let mut client = ControlClient::connect(path)?;
    let mut stdout = io::stdout();
    write!(stdout, "{}", client.banner())?;

    let stdin = io::stdin();
    let mut input = String::new();
    loop {
        write!(stdout, "{}", PROMPT)?;
        stdout.flush()?;

        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            // Ctrl-D
            writeln!(stdout)?;
            break;
        }
        let command = input.trim();

        match client.send(command)? {
            Some(response) => write!(stdout, "{}", response)?,
            None => break,
        }
        if matches!(command, "quit" | "exit") {
            break;
        }
    }
    Ok(())
}
