//! linechat - multi-user line-oriented chat server
//!
//! Users connect over Telnet, pick a display name and exchange lines of
//! text. Incoming messages never clobber what a user is typing: each
//! delivery erases the current line, prints the message and redraws the
//! user's prompt together with their unsent input.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use chat::{
    line_stream, Broadcaster, ChatCommand, ChatInput, CommandOutcome, LeaveReason,
    LifecycleState, Message, Registry, Session, SessionIo, TransportIo,
};
pub use config::Config;
pub use error::{ChatError, Result};
pub use server::{ChatServer, InputResult, LineBuffer, TelnetCommand, TelnetParser};
