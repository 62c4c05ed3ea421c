//! This module contains the value types exchanged with the MP7100 PSUs.

use strum_macros::{EnumCount, EnumIter, IntoStaticStr};
use thiserror::Error;

/// Point in time on the caller's millisecond clock.
pub type Instant = fugit::TimerInstantU64<1_000>;

/// Millisecond duration on the caller's clock.
pub type Duration = fugit::MillisDurationU64;

/// How long the PSU has to answer a command before it is declared timed out.
pub const COMMAND_TIMEOUT: Duration = Duration::from_ticks(1_000);

/// Every command and reply line ends with a carriage return.
pub const TERMINATOR: u8 = b'\r';

/// Largest value either 4 digit field of `SETD` can carry.
pub const FIELD_MAX: u16 = 9_999;

/// Every command the PSU understands.
///
/// The strum serialization is the wire mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount, IntoStaticStr)]
pub enum CommandKind {
    /// Switch the output on or off.
    #[strum(serialize = "SOUT")]
    SetOnOff,
    /// Read whether the output is on.
    #[strum(serialize = "GOUT")]
    GetOnOff,
    /// Write the voltage and current set-point.
    #[strum(serialize = "SETD")]
    SetVoltageCurrent,
    /// Read the measured output voltage and current.
    #[strum(serialize = "GETD")]
    GetDisplayVoltageCurrent,
    /// Read the configured voltage and current set-point.
    #[strum(serialize = "GETS")]
    GetSetVoltageCurrent,
    /// Read the lowest set-point the PSU accepts.
    #[strum(serialize = "GMIN")]
    GetMinimumVoltageCurrent,
    /// Read the highest set-point the PSU accepts.
    #[strum(serialize = "GMAX")]
    GetMaximumVoltageCurrent,
}

impl CommandKind {
    /// The four letter command mnemonic sent on the wire.
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Whether the reply starts with a data line before the status code.
    pub fn has_data_stage(self) -> bool {
        !matches!(self, CommandKind::SetOnOff | CommandKind::SetVoltageCurrent)
    }
}

/// Represents the two possible power supply control modes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Constant voltage regulation mode.
    #[default]
    Cv,
    /// Constant current regulation mode.
    Cc,
}

impl From<bool> for ControlMode {
    fn from(constant_current: bool) -> Self {
        match constant_current {
            true => ControlMode::Cc,
            false => ControlMode::Cv,
        }
    }
}

/// Used to be less ambiguous and whether something is on or off.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    #[default]
    Off,
    /// Enabled.
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// A voltage or current did not fit the PSU's 4 digit fixed-point fields.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Value out of range")]
pub struct OutOfRange;

/// Voltage and current set-point, held in the PSU's own fixed-point units.
///
/// Both fields are limited to 4 digits, so the highest set-point is 99.99V / 9.999A.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetPoint {
    voltage_cv: u16,
    current_ma: u16,
}

impl SetPoint {
    /// Create a set-point from centivolts and milliamps.
    pub fn new(voltage_cv: u16, current_ma: u16) -> Result<Self, OutOfRange> {
        if voltage_cv > FIELD_MAX || current_ma > FIELD_MAX {
            return Err(OutOfRange);
        }
        Ok(Self {
            voltage_cv,
            current_ma,
        })
    }

    /// Create a set-point from millivolts and milliamps.
    ///
    /// The PSU only resolves 10mV so the voltage is truncated to that.
    pub fn from_mv_ma(voltage_mv: u32, current_ma: u32) -> Result<Self, OutOfRange> {
        let voltage_cv = u16::try_from(voltage_mv / 10).map_err(|_| OutOfRange)?;
        let current_ma = u16::try_from(current_ma).map_err(|_| OutOfRange)?;
        Self::new(voltage_cv, current_ma)
    }

    /// Create a set-point from volts and amps, rounded to the nearest step.
    pub fn from_volts_amps(volts: f32, amps: f32) -> Result<Self, OutOfRange> {
        Self::new(to_fixed(volts, 100.0)?, to_fixed(amps, 1000.0)?)
    }

    /// Voltage in centivolts.
    pub fn voltage_cv(&self) -> u16 {
        self.voltage_cv
    }

    /// Current in milliamps.
    pub fn current_ma(&self) -> u16 {
        self.current_ma
    }

    /// Voltage in millivolts.
    pub fn voltage_mv(&self) -> u32 {
        self.voltage_cv as u32 * 10
    }

    /// Whether both values lie within `minimum..=maximum`.
    pub fn within(&self, minimum: &DecodedReading, maximum: &DecodedReading) -> bool {
        let voltage = self.voltage_cv as u32;
        let current = self.current_ma as u32;
        (minimum.voltage_cv..=maximum.voltage_cv).contains(&voltage)
            && (minimum.current_ma..=maximum.current_ma).contains(&current)
    }
}

fn to_fixed(value: f32, scale: f32) -> Result<u16, OutOfRange> {
    if value.is_nan() || value < 0.0 {
        return Err(OutOfRange);
    }
    let scaled = value * scale + 0.5;
    if scaled >= (FIELD_MAX as f32 + 1.0) {
        return Err(OutOfRange);
    }
    Ok(scaled as u16)
}

/// Values decoded from one reply.
///
/// Fields a command does not report stay at their zero value, as do all fields of a timed out command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodedReading {
    /// Voltage in centivolts. E.g. 12.50V => `1250`.
    pub voltage_cv: u32,
    /// Current in milliamps. E.g. 0.750A => `750`.
    pub current_ma: u32,
    /// Regulation mode, only reported by [`CommandKind::GetDisplayVoltageCurrent`].
    pub mode: ControlMode,
    /// Output state, only reported by [`CommandKind::GetOnOff`].
    pub output: State,
    /// Whether the PSU answered with `OK`.
    pub success: bool,
}

impl DecodedReading {
    /// Voltage in millivolts. The PSU may report anything, so this saturates rather than overflow.
    pub fn voltage_mv(&self) -> u32 {
        self.voltage_cv.saturating_mul(10)
    }

    /// Voltage in volts, for display only.
    pub fn volts(&self) -> f32 {
        self.voltage_cv as f32 / 100.0
    }

    /// Current in amps, for display only.
    pub fn amps(&self) -> f32 {
        self.current_ma as f32 / 1000.0
    }

    /// Interpret the reading as a set-point, if it fits the `SETD` fields.
    pub fn as_setpoint(&self) -> Option<SetPoint> {
        let voltage_cv = u16::try_from(self.voltage_cv).ok()?;
        let current_ma = u16::try_from(self.current_ma).ok()?;
        SetPoint::new(voltage_cv, current_ma).ok()
    }
}

/// The terminal result of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Which command this is the result of.
    pub kind: CommandKind,
    /// What the PSU reported.
    pub reading: DecodedReading,
}

impl Outcome {
    /// The shape every command resolves to when the PSU never answered.
    pub fn timed_out(kind: CommandKind) -> Self {
        Self {
            kind,
            reading: DecodedReading::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.reading.success
    }
}
