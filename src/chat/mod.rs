//! Chat module for linechat.
//!
//! This module provides the multi-user chat core:
//! - Sessions with a join/leave lifecycle
//! - A shared registry of active participants
//! - Broadcast delivery that restores each recipient's prompt
//! - Chat commands (/list, /exit, /help)
//! - The line stream interface transports plug into

mod broadcast;
mod command;
mod registry;
mod session;
pub mod stream;

pub use broadcast::{Broadcaster, Message};
pub use command::{
    execute, format_help, format_list, get_command_help, parse_input, ChatCommand, ChatInput,
    CommandInfo, CommandOutcome, COMMAND_MARKER,
};
pub use registry::{Registry, Targets};
pub use session::{LeaveReason, LifecycleState, Session, NAME_PROMPT, WELCOME_BANNER};
pub use stream::{line_stream, Outbound, SessionIo, TransportIo, ERASE_LINE};
