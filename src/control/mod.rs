//! Control surface
//!
//! Text commands over a Unix socket, plus the interactive client.

pub mod client;
pub mod commands;
pub mod server;

pub use client::{run_interactive, ClientError, ControlClient};
pub use commands::{dispatch, CommandOutcome, BANNER};
pub use server::{ControlServer, ServerError, END_OF_RESPONSE};
