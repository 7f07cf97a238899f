//! Chat command parser and interpreter.
//!
//! A line starting with [`COMMAND_MARKER`] is a command. The rest of the
//! line is matched exactly and case-sensitively; anything unrecognized is
//! reported back to the user and never affects the session's lifecycle.

use tracing::debug;

use super::registry::Registry;
use super::session::Session;

/// Leading character that marks a line as a command.
pub const COMMAND_MARKER: char = '/';

/// Result of parsing a chat input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Regular chat text.
    Message(String),
    /// Parsed command.
    Command(ChatCommand),
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// List connected users.
    List,
    /// Leave the chat.
    Exit,
    /// Show the command list.
    Help,
    /// Anything else; holds the full line as typed.
    Unknown(String),
}

impl ChatCommand {
    /// Get the command name.
    pub fn name(&self) -> &str {
        match self {
            ChatCommand::List => "list",
            ChatCommand::Exit => "exit",
            ChatCommand::Help => "help",
            ChatCommand::Unknown(line) => line.strip_prefix(COMMAND_MARKER).unwrap_or(line),
        }
    }
}

impl std::fmt::Display for ChatCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatCommand::Unknown(line) => f.write_str(line),
            command => write!(f, "{COMMAND_MARKER}{}", command.name()),
        }
    }
}

/// What the session should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep reading input.
    Continue,
    /// Input has been closed; the session is on its way out.
    Exit,
}

/// Parse a chat input line into a message or command.
///
/// The line is taken as-is apart from its trailing line terminator.
pub fn parse_input(input: &str) -> ChatInput {
    let line = input.trim_end_matches(['\r', '\n']);

    let Some(rest) = line.strip_prefix(COMMAND_MARKER) else {
        return ChatInput::Message(line.to_string());
    };

    let command = match rest {
        "list" => ChatCommand::List,
        "exit" => ChatCommand::Exit,
        "help" => ChatCommand::Help,
        _ => ChatCommand::Unknown(line.to_string()),
    };
    ChatInput::Command(command)
}

/// Chat command information for help display.
pub struct CommandInfo {
    /// Command name.
    pub name: &'static str,
    /// Command description.
    pub description: &'static str,
}

/// Get all available command information.
pub fn get_command_help() -> Vec<CommandInfo> {
    vec![
        CommandInfo {
            name: "list",
            description: "List connected users",
        },
        CommandInfo {
            name: "exit",
            description: "Exit chat",
        },
        CommandInfo {
            name: "help",
            description: "Show this help message",
        },
    ]
}

/// Format the help message for display.
pub fn format_help() -> String {
    let mut text = String::from("Available commands:\n");
    for info in get_command_help() {
        text.push_str(&format!(
            "  {COMMAND_MARKER}{} - {}\n",
            info.name, info.description
        ));
    }
    text
}

/// Format the connected user list for display.
pub fn format_list(names: &[String]) -> String {
    format!("Connected users: {}\n", names.join(", "))
}

/// Run a command on behalf of `session`.
pub async fn execute(
    command: &ChatCommand,
    session: &Session,
    registry: &Registry,
) -> CommandOutcome {
    match command {
        ChatCommand::List => {
            let names = registry.list().await;
            session.send(&format_list(&names));
            session.write_prompt();
        }
        ChatCommand::Exit => {
            session.send("Goodbye!\n");
            session.close_input().await;
            return CommandOutcome::Exit;
        }
        ChatCommand::Help => {
            session.send(&format_help());
            session.write_prompt();
        }
        ChatCommand::Unknown(line) => {
            debug!("Session {} sent unknown command {:?}", session.id(), line);
            session.send(&format!("Unknown command: {line}\n"));
            session.write_prompt();
        }
    }
    CommandOutcome::Continue
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chat::stream::{line_stream, OutputReceiver, TransportIo};

    fn drain(output: &mut OutputReceiver) -> String {
        let mut text = String::new();
        while let Some(chunk) = output.try_recv() {
            text.push_str(&String::from_utf8_lossy(chunk.as_bytes()));
        }
        text
    }

    async fn registered(registry: &Arc<Registry>, name: &str) -> (Arc<Session>, TransportIo) {
        let (io, transport) = line_stream();
        let session = Session::new(io, Arc::clone(registry));
        session.join(name).unwrap();
        registry.insert(&session).await;
        (session, transport)
    }

    #[test]
    fn test_parse_regular_message() {
        assert_eq!(
            parse_input("Hello, world!"),
            ChatInput::Message("Hello, world!".to_string())
        );
    }

    #[test]
    fn test_parse_keeps_whitespace() {
        assert_eq!(
            parse_input("  spaced out  "),
            ChatInput::Message("  spaced out  ".to_string())
        );
    }

    #[test]
    fn test_parse_strips_line_terminator() {
        assert_eq!(parse_input("hi\n"), ChatInput::Message("hi".to_string()));
        assert_eq!(parse_input("/list\r\n"), ChatInput::Command(ChatCommand::List));
    }

    #[test]
    fn test_parse_empty_message() {
        assert_eq!(parse_input(""), ChatInput::Message(String::new()));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("/list"), ChatInput::Command(ChatCommand::List));
        assert_eq!(parse_input("/exit"), ChatInput::Command(ChatCommand::Exit));
        assert_eq!(parse_input("/help"), ChatInput::Command(ChatCommand::Help));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(
            parse_input("/LIST"),
            ChatInput::Command(ChatCommand::Unknown("/LIST".to_string()))
        );
        assert_eq!(
            parse_input("/Exit"),
            ChatInput::Command(ChatCommand::Unknown("/Exit".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_arguments() {
        assert_eq!(
            parse_input("/list all"),
            ChatInput::Command(ChatCommand::Unknown("/list all".to_string()))
        );
        assert_eq!(
            parse_input("/exit "),
            ChatInput::Command(ChatCommand::Unknown("/exit ".to_string()))
        );
    }

    #[test]
    fn test_parse_leading_whitespace_is_chat() {
        assert_eq!(
            parse_input(" /exit"),
            ChatInput::Message(" /exit".to_string())
        );
    }

    #[test]
    fn test_parse_marker_only() {
        assert_eq!(
            parse_input("/"),
            ChatInput::Command(ChatCommand::Unknown("/".to_string()))
        );
    }

    #[test]
    fn test_command_name_and_display() {
        assert_eq!(ChatCommand::List.name(), "list");
        assert_eq!(ChatCommand::Exit.to_string(), "/exit");
        assert_eq!(ChatCommand::Help.to_string(), "/help");
        let unknown = ChatCommand::Unknown("/foo".to_string());
        assert_eq!(unknown.name(), "foo");
        assert_eq!(unknown.to_string(), "/foo");
    }

    #[test]
    fn test_format_help() {
        assert_eq!(
            format_help(),
            "Available commands:\n\
             \x20 /list - List connected users\n\
             \x20 /exit - Exit chat\n\
             \x20 /help - Show this help message\n"
        );
    }

    #[test]
    fn test_format_list() {
        let names = vec!["A".to_string(), "B".to_string()];
        assert_eq!(format_list(&names), "Connected users: A, B\n");
        assert_eq!(format_list(&[]), "Connected users: \n");
    }

    #[tokio::test]
    async fn test_execute_list() {
        let registry = Arc::new(Registry::new());
        let (_a, _a_io) = registered(&registry, "A").await;
        let (_b, _b_io) = registered(&registry, "B").await;
        let (carol, mut carol_io) = registered(&registry, "Carol").await;

        let outcome = execute(&ChatCommand::List, &carol, &registry).await;

        assert_eq!(outcome, CommandOutcome::Continue);
        assert_eq!(
            drain(&mut carol_io.output),
            "Connected users: A, B, Carol\nCarol: "
        );
    }

    #[tokio::test]
    async fn test_execute_help() {
        let registry = Arc::new(Registry::new());
        let (alice, mut alice_io) = registered(&registry, "Alice").await;

        let outcome = execute(&ChatCommand::Help, &alice, &registry).await;

        assert_eq!(outcome, CommandOutcome::Continue);
        let output = drain(&mut alice_io.output);
        assert!(output.starts_with("Available commands:\n"));
        assert!(output.ends_with("Alice: "));
    }

    #[tokio::test]
    async fn test_execute_unknown() {
        let registry = Arc::new(Registry::new());
        let (alice, mut alice_io) = registered(&registry, "Alice").await;

        let state_before = alice.state();
        let command = ChatCommand::Unknown("/foo".to_string());
        let outcome = execute(&command, &alice, &registry).await;

        assert_eq!(outcome, CommandOutcome::Continue);
        assert_eq!(
            drain(&mut alice_io.output),
            "Unknown command: /foo\nAlice: "
        );
        assert!(registry.contains(alice.id()).await);
        assert_eq!(alice.state(), state_before);
    }

    #[tokio::test]
    async fn test_execute_exit() {
        let registry = Arc::new(Registry::new());
        let (alice, mut alice_io) = registered(&registry, "Alice").await;

        let outcome = execute(&ChatCommand::Exit, &alice, &registry).await;

        assert_eq!(outcome, CommandOutcome::Exit);
        assert_eq!(drain(&mut alice_io.output), "Goodbye!\n");
        assert!(alice_io.lines.is_closed());
        assert_eq!(alice.read_line().await.unwrap(), None);
    }
}
