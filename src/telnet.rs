//! Telnet in-band option negotiation.
//!
//! The engine needs no terminal features, so every offer is declined: `WILL x`
//! is answered with `DONT x` and `DO x` with `WONT x`. [`Negotiator`] strips all
//! command sequences out of the byte stream and hands back the plain data
//! together with the replies that must be written to the peer. Its parser state
//! persists between calls, so a sequence split across two reads is handled.

use log::trace;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_TERMINAL_TYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    /// Previous data byte was a carriage return; a following NUL is padding.
    CarriageReturn,
    Iac,
    Option(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Output of one [`Negotiator::feed`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Filtered {
    /// Application data with all Telnet commands removed.
    pub data: Vec<u8>,
    /// Refusals to send back to the peer, already IAC-framed.
    pub replies: Vec<u8>,
}

/// Streaming IAC parser that declines every option.
#[derive(Debug, Default)]
pub struct Negotiator {
    state: State,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Filtered {
        let mut out = Filtered {
            data: Vec::with_capacity(input.len()),
            replies: Vec::new(),
        };
        for &byte in input {
            self.state = match self.state {
                State::Data | State::CarriageReturn => match byte {
                    IAC => State::Iac,
                    0 if self.state == State::CarriageReturn => State::Data,
                    b'\r' => {
                        out.data.push(byte);
                        State::CarriageReturn
                    }
                    _ => {
                        out.data.push(byte);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        out.data.push(IAC);
                        State::Data
                    }
                    WILL | WONT | DO | DONT => State::Option(byte),
                    SB => State::Subnegotiation,
                    // NOP, GA, AYT and the other two-byte commands carry no data.
                    _ => State::Data,
                },
                State::Option(verb) => {
                    match verb {
                        WILL => {
                            trace!("Telnet peer WILL {byte}, answering DONT");
                            out.replies.extend_from_slice(&[IAC, DONT, byte]);
                        }
                        DO => {
                            trace!("Telnet peer DO {byte}, answering WONT");
                            out.replies.extend_from_slice(&[IAC, WONT, byte]);
                        }
                        _ => trace!("Telnet peer sent {verb} {byte}, no reply needed"),
                    }
                    State::Data
                }
                State::Subnegotiation => match byte {
                    IAC => State::SubnegotiationIac,
                    _ => State::Subnegotiation,
                },
                State::SubnegotiationIac => match byte {
                    SE => State::Data,
                    _ => State::Subnegotiation,
                },
            };
        }
        out
    }
}

/// Doubles every literal 0xFF so outgoing data is not read as a command.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}
