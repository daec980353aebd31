// Author: Lukas Bower
// Purpose: Telnet option negotiation sequences and the inbound command filter.

//! Telnet framing used by the login console.
//!
//! Only the handful of commands the console emits are named here. Inbound
//! traffic is passed through [`CommandFilter`] so that a client's replies to
//! our negotiation never reach the credential matcher or the interpreter.

/// Interpret As Command escape byte.
pub const IAC: u8 = 255;
/// Sender refuses to let the receiver perform an option.
pub const DONT: u8 = 254;
/// Sender asks the receiver to perform an option.
pub const DO: u8 = 253;
/// Sender refuses to perform an option.
pub const WONT: u8 = 252;
/// Sender offers to perform an option.
pub const WILL: u8 = 251;
/// Start of subnegotiation.
pub const SB: u8 = 250;
/// End of subnegotiation.
pub const SE: u8 = 240;

/// Echo option (RFC 857).
pub const OPT_ECHO: u8 = 1;
/// Suppress go-ahead option (RFC 858).
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
/// Line mode option (RFC 1184).
pub const OPT_LINEMODE: u8 = 34;

/// Three option triplets sent as a single write.
pub type Negotiation = [u8; 9];

/// Sent before the username prompt: `WONT ECHO`, `WONT SGA`, `WILL LINEMODE`.
pub const USER_OPTIONS: Negotiation = [
    IAC,
    WONT,
    OPT_ECHO,
    IAC,
    WONT,
    OPT_SUPPRESS_GO_AHEAD,
    IAC,
    WILL,
    OPT_LINEMODE,
];

/// Sent before the password is read: `WILL ECHO` stops the client echoing locally.
pub const PASSWORD_OPTIONS: Negotiation = [
    IAC,
    WILL,
    OPT_ECHO,
    IAC,
    WONT,
    OPT_SUPPRESS_GO_AHEAD,
    IAC,
    WILL,
    OPT_LINEMODE,
];

/// Sent once logged in: character mode with server-side echo.
pub const REPL_OPTIONS: Negotiation = [
    IAC,
    WILL,
    OPT_ECHO,
    IAC,
    WILL,
    OPT_SUPPRESS_GO_AHEAD,
    IAC,
    WONT,
    OPT_LINEMODE,
];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Command,
    Option,
    Subnegotiation,
    SubnegotiationCommand,
}

/// Strips Telnet commands from inbound data, keeping state across chunks.
#[derive(Debug, Default)]
pub struct CommandFilter {
    state: FilterState,
}

impl CommandFilter {
    /// Create a filter positioned on plain data.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FilterState::Data,
        }
    }

    /// Forget any partially received command.
    pub fn reset(&mut self) {
        self.state = FilterState::Data;
    }

    /// Compact `buf` in place, removing commands, and return the number of data bytes kept.
    pub fn filter(&mut self, buf: &mut [u8]) -> usize {
        let mut kept = 0;
        for idx in 0..buf.len() {
            let byte = buf[idx];
            self.state = match (self.state, byte) {
                (FilterState::Data, IAC) => FilterState::Command,
                (FilterState::Data, data) => {
                    buf[kept] = data;
                    kept += 1;
                    FilterState::Data
                }
                (FilterState::Command, IAC) => {
                    buf[kept] = IAC;
                    kept += 1;
                    FilterState::Data
                }
                (FilterState::Command, WILL | WONT | DO | DONT) => FilterState::Option,
                (FilterState::Command, SB) => FilterState::Subnegotiation,
                (FilterState::Command, _) | (FilterState::Option, _) => FilterState::Data,
                (FilterState::Subnegotiation, IAC) => FilterState::SubnegotiationCommand,
                (FilterState::Subnegotiation, _) => FilterState::Subnegotiation,
                (FilterState::SubnegotiationCommand, SE) => FilterState::Data,
                (FilterState::SubnegotiationCommand, _) => FilterState::Subnegotiation,
            };
        }
        kept
    }
}
