use crate::{
    command::Command,
    error::Result,
    framer::LineFramer,
    stage::{Stage, Step},
    types::{COMMAND_TIMEOUT, CommandKind, Instant, Outcome, SetPoint, State},
};
use embedded_io::Write;
use log::{debug, warn};

/// The command waiting for its reply.
#[derive(Debug, Clone, Copy)]
struct Pending {
    stage: Stage,
    deadline: Instant,
}

/// You can create a Mp7100 using any interface which implements [embedded_io::Write].
///
/// The PSU answers one command at a time. Replies are not read from the interface, hand whatever bytes
/// arrive to [Self::receive] and call [Self::poll] regularly so unanswered commands time out.
///
/// Every submitted command resolves to exactly one [Outcome]: from [Self::receive] once the reply is
/// complete, from [Self::poll] once [COMMAND_TIMEOUT] has passed, or from the next submission which
/// displaces it. `L` is the receive buffer capacity.
pub struct Mp7100<S: Write, const L: usize = 64> {
    interface: S,
    framer: LineFramer<L>,
    pending: Option<Pending>,
}

impl<S: Write, const L: usize> Mp7100<S, L> {
    /// Create a new Mp7100 instance with the given interface.
    pub fn new(interface: S) -> Self {
        Self {
            interface,
            framer: LineFramer::new(),
            pending: None,
        }
    }

    /// Switch the output on or off.
    pub fn set_on_off(&mut self, state: impl Into<State>, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::SetOnOff(state.into()), now)
    }

    /// Ask whether the output is on.
    pub fn get_on_off(&mut self, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::GetOnOff, now)
    }

    /// Write a new voltage and current set-point.
    pub fn set_voltage_current(&mut self, setpoint: SetPoint, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::SetVoltageCurrent(setpoint), now)
    }

    /// Ask for the measured output voltage, current and regulation mode.
    pub fn get_display_voltage_current(&mut self, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::GetDisplayVoltageCurrent, now)
    }

    /// Ask for the configured set-point.
    pub fn get_set_voltage_current(&mut self, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::GetSetVoltageCurrent, now)
    }

    /// Ask for the lowest set-point the PSU accepts.
    pub fn get_minimum_voltage_current(&mut self, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::GetMinimumVoltageCurrent, now)
    }

    /// Ask for the highest set-point the PSU accepts.
    pub fn get_maximum_voltage_current(&mut self, now: Instant) -> Result<Option<Outcome>, S::Error> {
        self.submit(Command::GetMaximumVoltageCurrent, now)
    }

    /// Send a command and arm its deadline.
    ///
    /// Returns the timed out outcome of the command this one displaced, if any. If the interface fails to send,
    /// nothing changes: an outstanding command stays outstanding.
    pub fn submit(&mut self, command: Command, now: Instant) -> Result<Option<Outcome>, S::Error> {
        let line = command.encode().map_err(|_| crate::error::Error::BufferError)?;

        debug!("send: {}", line.trim_end());
        self.interface
            .write_all(line.as_bytes())
            .map_err(crate::error::Error::SerialError)?;

        let displaced = self.cancel();
        self.pending = Some(Pending {
            stage: Stage::first(command.kind()),
            deadline: now + COMMAND_TIMEOUT,
        });
        Ok(displaced)
    }

    /// Feed bytes received from the PSU.
    ///
    /// Returns the outcome of the outstanding command if this completed it, or if its deadline had already passed.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> Option<Outcome> {
        let mut resolved = self.poll(now);

        let Self { framer, pending, .. } = self;
        let dropped = framer.push(bytes, |line| {
            if line.is_empty() {
                return;
            }
            debug!("received: {}", as_text(line));
            let Some(current) = pending.take() else {
                warn!("unexpected data received: {}", as_text(line));
                return;
            };
            match current.stage.advance(line) {
                Step::Next(stage) => *pending = Some(Pending { stage, ..current }),
                Step::Done(outcome) => resolved = Some(outcome),
            }
        });
        if dropped > 0 {
            warn!("receive buffer overflow, dropped {} bytes", dropped);
        }

        resolved
    }

    /// Time out the outstanding command if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Outcome> {
        match self.pending {
            Some(pending) if now >= pending.deadline => {
                warn!("{} timed out", pending.stage.kind().mnemonic());
                self.cancel()
            }
            _ => None,
        }
    }

    /// Resolve the outstanding command as timed out without waiting for its deadline.
    pub fn cancel(&mut self) -> Option<Outcome> {
        self.pending.take().map(|pending| pending.stage.timeout())
    }

    /// Return to idle, as if freshly created: cancels the outstanding command and drops partially received lines.
    pub fn reset(&mut self) -> Option<Outcome> {
        self.framer.clear();
        self.cancel()
    }

    /// Whether a command is waiting for its reply.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Which command is waiting for its reply.
    pub fn outstanding(&self) -> Option<CommandKind> {
        self.pending.map(|pending| pending.stage.kind())
    }

    /// When the outstanding command times out.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.deadline)
    }

    /// Swap in a new interface, e.g. a reopened serial port, returning the old one.
    pub fn replace_interface(&mut self, interface: S) -> S {
        core::mem::replace(&mut self.interface, interface)
    }

    pub fn interface(&self) -> &S {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }
}

fn as_text(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("<non-ascii>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock_serial::MockSerial,
        types::{ControlMode, DecodedReading, Duration},
    };
    use strum::IntoEnumIterator;

    fn at(ms: u64) -> Instant {
        Instant::from_ticks(ms)
    }

    fn submit_kind(psu: &mut Mp7100<MockSerial>, kind: CommandKind, now: Instant) -> Option<Outcome> {
        let result = match kind {
            CommandKind::SetOnOff => psu.set_on_off(true, now),
            CommandKind::GetOnOff => psu.get_on_off(now),
            CommandKind::SetVoltageCurrent => psu.set_voltage_current(SetPoint::new(500, 100).unwrap(), now),
            CommandKind::GetDisplayVoltageCurrent => psu.get_display_voltage_current(now),
            CommandKind::GetSetVoltageCurrent => psu.get_set_voltage_current(now),
            CommandKind::GetMinimumVoltageCurrent => psu.get_minimum_voltage_current(now),
            CommandKind::GetMaximumVoltageCurrent => psu.get_maximum_voltage_current(now),
        };
        result.unwrap()
    }

    /// A well formed, successful reply for each command.
    fn good_reply(kind: CommandKind) -> &'static [u8] {
        match kind {
            CommandKind::SetOnOff | CommandKind::SetVoltageCurrent => b"OK\r",
            CommandKind::GetOnOff => b"1\rOK\r",
            CommandKind::GetDisplayVoltageCurrent => b"1250;0750;1\rOK\r",
            CommandKind::GetSetVoltageCurrent
            | CommandKind::GetMinimumVoltageCurrent
            | CommandKind::GetMaximumVoltageCurrent => b"1250;0750\rOK\r",
        }
    }

    #[test]
    fn every_command_succeeds_on_good_reply() {
        for kind in CommandKind::iter() {
            let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
            assert_eq!(submit_kind(&mut psu, kind, at(0)), None);
            assert_eq!(psu.outstanding(), Some(kind));

            let outcome = psu.receive(good_reply(kind), at(10)).unwrap();
            assert_eq!(outcome.kind, kind);
            assert!(outcome.is_success(), "{kind:?}");
            assert!(!psu.is_busy());

            match kind {
                CommandKind::GetOnOff => assert_eq!(outcome.reading.output, State::On),
                CommandKind::GetDisplayVoltageCurrent => {
                    assert_eq!(outcome.reading.voltage_cv, 1250);
                    assert_eq!(outcome.reading.current_ma, 750);
                    assert_eq!(outcome.reading.mode, ControlMode::Cc);
                }
                CommandKind::GetSetVoltageCurrent
                | CommandKind::GetMinimumVoltageCurrent
                | CommandKind::GetMaximumVoltageCurrent => {
                    assert_eq!(outcome.reading.voltage_cv, 1250);
                    assert_eq!(outcome.reading.current_ma, 750);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn every_command_times_out_once() {
        for kind in CommandKind::iter() {
            let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
            submit_kind(&mut psu, kind, at(100));
            assert_eq!(psu.deadline(), Some(at(100) + COMMAND_TIMEOUT));

            assert_eq!(psu.poll(at(1099)), None);
            let outcome = psu.poll(at(1100)).unwrap();
            assert_eq!(outcome, Outcome::timed_out(kind));
            assert_eq!(outcome.reading, DecodedReading::default());

            assert_eq!(psu.poll(at(5000)), None);
            assert!(!psu.is_busy());
        }
    }

    #[test]
    fn timeout_after_first_stage() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_display_voltage_current(at(0)).unwrap();
        assert_eq!(psu.receive(b"1250;0750;1\r", at(10)), None);

        let outcome = psu.poll(at(1000)).unwrap();
        assert_eq!(outcome, Outcome::timed_out(CommandKind::GetDisplayVoltageCurrent));
    }

    #[test]
    fn late_reply_is_discarded() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_on_off(at(0)).unwrap();

        // The deadline passed before the reply arrived, so the reply has nobody to go to.
        let outcome = psu.receive(b"1\rOK\r", at(1500)).unwrap();
        assert_eq!(outcome, Outcome::timed_out(CommandKind::GetOnOff));
        assert!(!psu.is_busy());
    }

    #[test]
    fn new_command_displaces_outstanding() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_minimum_voltage_current(at(0)).unwrap();
        psu.receive(b"0000;0000\r", at(10));

        let displaced = psu.get_maximum_voltage_current(at(20)).unwrap().unwrap();
        assert_eq!(displaced, Outcome::timed_out(CommandKind::GetMinimumVoltageCurrent));
        assert_eq!(psu.outstanding(), Some(CommandKind::GetMaximumVoltageCurrent));
        assert_eq!(psu.deadline(), Some(at(20) + COMMAND_TIMEOUT));

        // The reply now belongs to the new command, the displaced one never resolves again.
        let outcome = psu.receive(b"3000;5000\rOK\r", at(30)).unwrap();
        assert_eq!(outcome.kind, CommandKind::GetMaximumVoltageCurrent);
        assert_eq!(outcome.reading.voltage_cv, 3000);
        assert_eq!(psu.poll(at(5000)), None);
    }

    #[test]
    fn split_reply_decodes_like_whole_reply() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_display_voltage_current(at(0)).unwrap();
        assert_eq!(psu.receive(b"12;500", at(1)), None);
        assert_eq!(psu.receive(b";1\r", at(2)), None);
        let split = psu.receive(b"OK\r", at(3)).unwrap();

        psu.get_display_voltage_current(at(10)).unwrap();
        let whole = psu.receive(b"12;500;1\rOK\r", at(11)).unwrap();

        assert_eq!(split, whole);
        assert_eq!(whole.reading.voltage_cv, 12);
        assert_eq!(whole.reading.current_ma, 500);
        assert_eq!(whole.reading.mode, ControlMode::Cc);
    }

    #[test]
    fn status_split_mid_code() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.set_on_off(State::Off, at(0)).unwrap();
        assert_eq!(psu.receive(b"O", at(1)), None);
        assert!(psu.receive(b"K\r", at(2)).unwrap().is_success());
    }

    #[test]
    fn set_voltage_current_wire_format() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        let setpoint = SetPoint::from_volts_amps(12.34, 0.567).unwrap();
        psu.set_voltage_current(setpoint, at(0)).unwrap();
        assert_eq!(psu.interface().written_data(), b"SETD12340567\r");

        let outcome = psu.receive(b"OK\r", at(50)).unwrap();
        assert_eq!(outcome.kind, CommandKind::SetVoltageCurrent);
        assert!(outcome.is_success());
    }

    #[test]
    fn display_reading_example() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_display_voltage_current(at(0)).unwrap();
        assert_eq!(psu.interface().written_data(), b"GETD\r");

        assert_eq!(psu.receive(b"1250;0750;1\r", at(5)), None);
        let outcome = psu.receive(b"OK\r", at(6)).unwrap();
        assert_eq!(outcome.reading.volts(), 12.5);
        assert_eq!(outcome.reading.amps(), 0.75);
        assert_eq!(outcome.reading.mode, ControlMode::Cc);
        assert!(outcome.is_success());
    }

    #[test]
    fn refused_command_is_a_failure() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_on_off(at(0)).unwrap();
        let outcome = psu.receive(b"1\rER\r", at(5)).unwrap();
        assert_eq!(outcome.reading.output, State::On);
        assert!(!outcome.is_success());
    }

    #[test]
    fn bytes_while_idle_are_discarded() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        assert_eq!(psu.receive(b"OK\r1250;0750\r", at(0)), None);
        assert!(!psu.is_busy());

        // The machine keeps working afterwards.
        psu.get_on_off(at(10)).unwrap();
        assert!(psu.receive(b"0\rOK\r", at(20)).unwrap().is_success());
    }

    #[test]
    fn trailing_line_after_completion_is_discarded() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.set_on_off(State::On, at(0)).unwrap();
        let outcome = psu.receive(b"OK\rOK\r", at(5)).unwrap();
        assert_eq!(outcome.kind, CommandKind::SetOnOff);
        assert!(!psu.is_busy());
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_on_off(at(0)).unwrap();
        assert_eq!(psu.receive(b"\r\r1\r\r", at(5)), None);
        assert_eq!(psu.outstanding(), Some(CommandKind::GetOnOff));
        assert_eq!(psu.receive(b"OK\r", at(6)).unwrap().reading.output, State::On);
    }

    #[test]
    fn failed_send_keeps_outstanding_command() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_on_off(at(0)).unwrap();

        psu.interface_mut().set_write_error(true);
        let result = psu.get_display_voltage_current(at(10));
        assert!(matches!(result, Err(crate::error::Error::SerialError(_))));
        assert_eq!(psu.outstanding(), Some(CommandKind::GetOnOff));
        assert_eq!(psu.deadline(), Some(at(0) + COMMAND_TIMEOUT));

        assert_eq!(psu.poll(at(1000)), Some(Outcome::timed_out(CommandKind::GetOnOff)));
    }

    #[test]
    fn output_switch_wire_format() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.set_on_off(State::On, at(0)).unwrap();
        psu.set_on_off(false, at(1)).unwrap();
        psu.get_on_off(at(2)).unwrap();
        psu.get_set_voltage_current(at(3)).unwrap();
        psu.get_minimum_voltage_current(at(4)).unwrap();
        psu.get_maximum_voltage_current(at(5)).unwrap();
        assert_eq!(
            psu.interface().written_lines(),
            vec!["SOUT1", "SOUT0", "GOUT", "GETS", "GMIN", "GMAX"]
        );
    }

    #[test]
    fn reset_drops_partial_reply() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_set_voltage_current(at(0)).unwrap();
        psu.receive(b"1250;07", at(1));

        assert_eq!(psu.reset(), Some(Outcome::timed_out(CommandKind::GetSetVoltageCurrent)));
        assert_eq!(psu.reset(), None);

        psu.get_set_voltage_current(at(10)).unwrap();
        let outcome = psu.receive(b"500;100\rOK\r", at(11)).unwrap();
        assert_eq!(outcome.reading.voltage_cv, 500);
        assert_eq!(outcome.reading.current_ma, 100);
    }

    #[test]
    fn overlong_garbage_does_not_wedge_the_machine() {
        let mut psu: Mp7100<MockSerial, 8> = Mp7100::new(MockSerial::new());
        psu.get_set_voltage_current(at(0)).unwrap();
        assert_eq!(psu.receive(b"0123456789012345\r", at(1)), None);
        assert_eq!(psu.outstanding(), Some(CommandKind::GetSetVoltageCurrent));

        psu.receive(b"1;2\r", at(2));
        assert!(psu.receive(b"OK\r", at(3)).unwrap().is_success());
    }

    #[test]
    fn replace_interface_returns_old_port() {
        let mut psu: Mp7100<MockSerial> = Mp7100::new(MockSerial::new());
        psu.get_on_off(at(0)).unwrap();
        let old = psu.replace_interface(MockSerial::new());
        assert_eq!(old.written_data(), b"GOUT\r");
        assert!(psu.interface().written_data().is_empty());
    }

    #[test]
    fn deadline_is_fixed_protocol_constant() {
        assert_eq!(COMMAND_TIMEOUT, Duration::from_ticks(1000));
    }
}
