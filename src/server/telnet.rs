//! Telnet protocol handling.
//!
//! The subset of RFC 854 needed to run a character-at-a-time chat terminal:
//! option negotiation for server-side echo, IAC stripping, and the break /
//! interrupt-process signals.

use tracing::warn;

/// Telnet command bytes (IAC = Interpret As Command).
pub mod iac {
    /// IAC - Interpret As Command (255)
    pub const IAC: u8 = 255;

    /// DONT - Sender wants receiver to disable option (254)
    pub const DONT: u8 = 254;

    /// DO - Sender wants receiver to enable option (253)
    pub const DO: u8 = 253;

    /// WONT - Sender refuses to enable option (252)
    pub const WONT: u8 = 252;

    /// WILL - Sender wants to enable option (251)
    pub const WILL: u8 = 251;

    /// SB - Subnegotiation Begin (250)
    pub const SB: u8 = 250;

    /// GA - Go Ahead (249)
    pub const GA: u8 = 249;

    /// IP - Interrupt Process (244)
    pub const IP: u8 = 244;

    /// BRK - Break (243)
    pub const BRK: u8 = 243;

    /// NOP - No Operation (241)
    pub const NOP: u8 = 241;

    /// SE - Subnegotiation End (240)
    pub const SE: u8 = 240;
}

/// Telnet option codes.
pub mod option {
    /// ECHO - Echo option (1)
    pub const ECHO: u8 = 1;

    /// SGA - Suppress Go Ahead (3)
    pub const SGA: u8 = 3;

    /// NAWS - Negotiate About Window Size (31)
    pub const NAWS: u8 = 31;
}

/// Longest subnegotiation body kept; longer ones are discarded.
pub const MAX_SUBNEGOTIATION: usize = 1024;

/// A set of Telnet option codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct OptionSet([u64; 4]);

impl OptionSet {
    fn contains(&self, opt: u8) -> bool {
        self.0[usize::from(opt / 64)] & (1 << (opt % 64)) != 0
    }

    /// Add `opt`, returning true if it was not present.
    fn insert(&mut self, opt: u8) -> bool {
        let added = !self.contains(opt);
        self.0[usize::from(opt / 64)] |= 1 << (opt % 64);
        added
    }

    fn remove(&mut self, opt: u8) {
        self.0[usize::from(opt / 64)] &= !(1 << (opt % 64));
    }
}

/// Negotiation state for both sides of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiationState {
    /// Whether the server echoes input back to the client.
    pub echo_enabled: bool,
    /// Whether go-ahead is suppressed.
    pub sga_enabled: bool,
    /// Whether the client suppresses go-ahead on its side.
    pub client_sga_enabled: bool,
    /// Options the server has already refused to enable.
    refused_local: OptionSet,
    /// Options the client offered and the server already declined.
    refused_remote: OptionSet,
}

/// Bytes sent on connect: the server will echo and suppress go-ahead,
/// which puts well-behaved clients into character-at-a-time mode.
pub fn initial_negotiation() -> Vec<u8> {
    vec![
        iac::IAC,
        iac::WILL,
        option::ECHO,
        iac::IAC,
        iac::WILL,
        option::SGA,
    ]
}

/// A parsed Telnet command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetCommand {
    /// WILL option
    Will(u8),
    /// WONT option
    Wont(u8),
    /// DO option
    Do(u8),
    /// DONT option
    Dont(u8),
    /// Subnegotiation data
    Subnegotiation { option: u8, data: Vec<u8> },
    /// Break
    Break,
    /// Interrupt Process
    InterruptProcess,
    /// NOP
    Nop,
    /// Go Ahead
    GoAhead,
}

impl TelnetCommand {
    /// Check whether the command asks to interrupt the session.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, TelnetCommand::Break | TelnetCommand::InterruptProcess)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParserState {
    #[default]
    Data,
    Iac,
    Option(u8),
    Subneg,
    SubnegIac,
}

/// Incremental parser separating data bytes from Telnet commands.
///
/// Sequences split across reads are carried over to the next call.
#[derive(Debug, Default)]
pub struct TelnetParser {
    state: ParserState,
    subneg: Vec<u8>,
    /// Set when the current subnegotiation exceeded [`MAX_SUBNEGOTIATION`].
    subneg_overflow: bool,
}

impl TelnetParser {
    /// Create a new Telnet parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse input bytes into (data bytes, commands).
    pub fn parse(&mut self, input: &[u8]) -> (Vec<u8>, Vec<TelnetCommand>) {
        let mut data = Vec::with_capacity(input.len());
        let mut commands = Vec::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (ParserState::Data, iac::IAC) => ParserState::Iac,
                (ParserState::Data, _) => {
                    data.push(byte);
                    ParserState::Data
                }
                (ParserState::Iac, iac::IAC) => {
                    data.push(iac::IAC);
                    ParserState::Data
                }
                (ParserState::Iac, iac::WILL | iac::WONT | iac::DO | iac::DONT) => {
                    ParserState::Option(byte)
                }
                (ParserState::Iac, iac::SB) => {
                    self.subneg.clear();
                    self.subneg_overflow = false;
                    ParserState::Subneg
                }
                (ParserState::Iac, command) => {
                    match command {
                        iac::BRK => commands.push(TelnetCommand::Break),
                        iac::IP => commands.push(TelnetCommand::InterruptProcess),
                        iac::NOP => commands.push(TelnetCommand::Nop),
                        iac::GA => commands.push(TelnetCommand::GoAhead),
                        other => warn!("Ignoring unsupported Telnet command IAC {:02X}", other),
                    }
                    ParserState::Data
                }
                (ParserState::Option(verb), opt) => {
                    commands.push(match verb {
                        iac::WILL => TelnetCommand::Will(opt),
                        iac::WONT => TelnetCommand::Wont(opt),
                        iac::DO => TelnetCommand::Do(opt),
                        _ => TelnetCommand::Dont(opt),
                    });
                    ParserState::Data
                }
                (ParserState::Subneg, iac::IAC) => ParserState::SubnegIac,
                (ParserState::Subneg, _) => {
                    self.push_subneg(byte);
                    ParserState::Subneg
                }
                (ParserState::SubnegIac, iac::SE) => {
                    let mut body = std::mem::take(&mut self.subneg);
                    if std::mem::take(&mut self.subneg_overflow) {
                        warn!(
                            "Discarded Telnet subnegotiation longer than {} bytes",
                            MAX_SUBNEGOTIATION
                        );
                    } else if body.is_empty() {
                        warn!("Empty Telnet subnegotiation");
                    } else {
                        let option = body.remove(0);
                        commands.push(TelnetCommand::Subnegotiation { option, data: body });
                    }
                    ParserState::Data
                }
                (ParserState::SubnegIac, _) => {
                    // IAC IAC inside a subnegotiation is a literal 255.
                    self.push_subneg(byte);
                    ParserState::Subneg
                }
            };
        }

        (data, commands)
    }

    /// Buffer one subnegotiation byte; past the limit bytes are dropped
    /// until the closing `IAC SE`.
    fn push_subneg(&mut self, byte: u8) {
        if self.subneg_overflow {
            return;
        }
        if self.subneg.len() < MAX_SUBNEGOTIATION {
            self.subneg.push(byte);
        } else {
            self.subneg_overflow = true;
            self.subneg = Vec::new();
        }
    }

    /// Generate the reply to a received negotiation command.
    ///
    /// Only ECHO and SGA are offered by the server; the client may suppress
    /// go-ahead but may not enable anything else. A request for the state an
    /// option is already in is not answered, so negotiation cannot loop.
    pub fn respond_to_command(command: &TelnetCommand, state: &mut NegotiationState) -> Vec<u8> {
        match *command {
            TelnetCommand::Do(option::ECHO) => {
                state.echo_enabled = true;
                vec![]
            }
            TelnetCommand::Do(option::SGA) => {
                state.sga_enabled = true;
                vec![]
            }
            TelnetCommand::Do(opt) if state.refused_local.insert(opt) => {
                vec![iac::IAC, iac::WONT, opt]
            }
            TelnetCommand::Dont(opt) if opt != option::ECHO && opt != option::SGA => {
                state.refused_local.remove(opt);
                vec![]
            }
            TelnetCommand::Dont(option::ECHO) if state.echo_enabled => {
                state.echo_enabled = false;
                vec![iac::IAC, iac::WONT, option::ECHO]
            }
            TelnetCommand::Dont(option::SGA) if state.sga_enabled => {
                state.sga_enabled = false;
                vec![iac::IAC, iac::WONT, option::SGA]
            }
            TelnetCommand::Will(option::SGA) if !state.client_sga_enabled => {
                state.client_sga_enabled = true;
                vec![iac::IAC, iac::DO, option::SGA]
            }
            TelnetCommand::Wont(option::SGA) if state.client_sga_enabled => {
                state.client_sga_enabled = false;
                vec![iac::IAC, iac::DONT, option::SGA]
            }
            TelnetCommand::Will(opt)
                if opt != option::SGA && state.refused_remote.insert(opt) =>
            {
                vec![iac::IAC, iac::DONT, opt]
            }
            TelnetCommand::Wont(opt) if opt != option::SGA => {
                state.refused_remote.remove(opt);
                vec![]
            }
            _ => vec![],
        }
    }
}
