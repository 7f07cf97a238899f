//! Telnet front end.
//!
//! This module provides the TCP listener, Telnet protocol handling and the
//! bridge that turns a socket into a chat session's line stream.

mod connection;
pub mod input;
mod listener;
pub mod telnet;

pub use connection::{encode_text, serve_connection};
pub use input::{InputResult, LineBuffer};
pub use listener::{ChatServer, ConnectionPermit};
pub use telnet::{
    iac, initial_negotiation, option, NegotiationState, TelnetCommand, TelnetParser,
};
