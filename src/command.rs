//! Commands and their line encoding.

use core::fmt::Write;

use crate::types::{CommandKind, SetPoint, State, TERMINATOR};

/// Longest encoded line is `SETD` + 8 digits + terminator.
pub const MAX_LINE_LEN: usize = 16;

/// One encoded command line, terminator included.
pub type Line = heapless::String<MAX_LINE_LEN>;

/// A command together with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetOnOff(State),
    GetOnOff,
    SetVoltageCurrent(SetPoint),
    GetDisplayVoltageCurrent,
    GetSetVoltageCurrent,
    GetMinimumVoltageCurrent,
    GetMaximumVoltageCurrent,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetOnOff(_) => CommandKind::SetOnOff,
            Command::GetOnOff => CommandKind::GetOnOff,
            Command::SetVoltageCurrent(_) => CommandKind::SetVoltageCurrent,
            Command::GetDisplayVoltageCurrent => CommandKind::GetDisplayVoltageCurrent,
            Command::GetSetVoltageCurrent => CommandKind::GetSetVoltageCurrent,
            Command::GetMinimumVoltageCurrent => CommandKind::GetMinimumVoltageCurrent,
            Command::GetMaximumVoltageCurrent => CommandKind::GetMaximumVoltageCurrent,
        }
    }

    /// Encode the command as it is sent on the wire.
    ///
    /// E.g. 12.34V / 0.567A => `SETD12340567\r`.
    pub fn encode(&self) -> Result<Line, core::fmt::Error> {
        let mut line = Line::new();
        line.push_str(self.kind().mnemonic()).map_err(|_| core::fmt::Error)?;
        match self {
            Command::SetOnOff(state) => {
                let digit = if bool::from(*state) { '1' } else { '0' };
                line.push(digit).map_err(|_| core::fmt::Error)?;
            }
            Command::SetVoltageCurrent(setpoint) => {
                write!(line, "{:04}{:04}", setpoint.voltage_cv(), setpoint.current_ma())?;
            }
            _ => {}
        }
        line.push(TERMINATOR as char).map_err(|_| core::fmt::Error)?;
        Ok(line)
    }
}
