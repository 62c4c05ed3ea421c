//! Reply decoding, one pipeline per command kind.
//!
//! Writes are answered by a single status line. Reads are answered by a data line followed by a status line,
//! the data line is captured in the stage until the status arrives.

use crate::types::{CommandKind, ControlMode, DecodedReading, Outcome, State};

/// The reply shape the PSU owes us next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the status code answering `SOUT` or `SETD`.
    Status(CommandKind),
    /// Waiting for the single output state digit answering `GOUT`.
    OutputState,
    /// Waiting for the `;` separated fields answering `GETD`, `GETS`, `GMIN` or `GMAX`.
    Fields(CommandKind),
    /// Data line received, waiting for the status code.
    FinalStatus {
        kind: CommandKind,
        captured: DecodedReading,
    },
}

/// What a decoded line leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next(Stage),
    Done(Outcome),
}

impl Stage {
    /// The stage a freshly sent command starts in.
    pub fn first(kind: CommandKind) -> Self {
        match kind {
            CommandKind::GetOnOff => Stage::OutputState,
            _ if kind.has_data_stage() => Stage::Fields(kind),
            _ => Stage::Status(kind),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match *self {
            Stage::Status(kind) | Stage::Fields(kind) | Stage::FinalStatus { kind, .. } => kind,
            Stage::OutputState => CommandKind::GetOnOff,
        }
    }

    /// Decode one reply line, terminator already stripped.
    ///
    /// Every line is accepted: numbers that do not parse decode as zero, a status other than `OK` is a failure.
    pub fn advance(self, line: &[u8]) -> Step {
        match self {
            Stage::Status(kind) => Step::Done(Outcome {
                kind,
                reading: DecodedReading {
                    success: is_ok(line),
                    ..Default::default()
                },
            }),
            Stage::OutputState => Step::Next(Stage::FinalStatus {
                kind: CommandKind::GetOnOff,
                captured: DecodedReading {
                    output: State::from(line.first() == Some(&b'1')),
                    ..Default::default()
                },
            }),
            Stage::Fields(kind) => Step::Next(Stage::FinalStatus {
                kind,
                captured: decode_fields(kind, line),
            }),
            Stage::FinalStatus { kind, captured } => Step::Done(Outcome {
                kind,
                reading: DecodedReading {
                    success: is_ok(line),
                    ..captured
                },
            }),
        }
    }

    /// Resolve the stage without a reply. Anything captured so far is thrown away.
    pub fn timeout(self) -> Outcome {
        Outcome::timed_out(self.kind())
    }
}

fn is_ok(line: &[u8]) -> bool {
    line.starts_with(b"OK")
}

/// `<centivolts>;<milliamps>[;<cc>]`, missing fields decode as zero.
fn decode_fields(kind: CommandKind, line: &[u8]) -> DecodedReading {
    let mut fields = line.split(|&b| b == b';');
    let voltage_cv = fields.next().map(parse_uint).unwrap_or(0);
    let current_ma = fields.next().map(parse_uint).unwrap_or(0);
    let mode = match kind {
        CommandKind::GetDisplayVoltageCurrent => {
            ControlMode::from(fields.next().map(|f| f.trim_ascii()) == Some(b"1".as_slice()))
        }
        _ => ControlMode::Cv,
    };
    DecodedReading {
        voltage_cv,
        current_ma,
        mode,
        ..Default::default()
    }
}

fn parse_uint(field: &[u8]) -> u32 {
    core::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
