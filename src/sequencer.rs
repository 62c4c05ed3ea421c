//! Keeps a connected PSU polled and pushes user changes to it.
//!
//! Once connected the [Sequencer] cycles through the queries below, one at a time, advancing only once the
//! previous query has resolved:
//!
//! ```text
//! GMIN -> GMAX -> GOUT -> GETD -> GETS -> GOUT -> GETD -> GETS -> ...
//! ```
//!
//! A requested output switch or set-point is sent in place of the next query. A watchdog declares the
//! connection dead when no reply has been decoded successfully for a while.

use embedded_io::Write;
use log::{error, info, warn};

use crate::{
    command::Command,
    psu::Mp7100,
    types::{CommandKind, DecodedReading, Duration, Instant, OutOfRange, Outcome, SetPoint, State},
};

/// Receives everything the sequencer learns about the PSU.
pub trait Listener {
    /// Called once for every submitted command, timeouts included.
    fn outcome(&mut self, _outcome: &Outcome) {}

    /// The watchdog expired. Polling has stopped until [Sequencer::connect] is called again.
    fn connection_lost(&mut self) {}
}

impl Listener for () {}

/// The queries of the polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Minimums,
    Maximums,
    OutputState,
    Display,
    Setpoint,
}

impl PollStep {
    pub fn command(self) -> Command {
        match self {
            PollStep::Minimums => Command::GetMinimumVoltageCurrent,
            PollStep::Maximums => Command::GetMaximumVoltageCurrent,
            PollStep::OutputState => Command::GetOnOff,
            PollStep::Display => Command::GetDisplayVoltageCurrent,
            PollStep::Setpoint => Command::GetSetVoltageCurrent,
        }
    }

    /// The query following this one. The bounds are only read once per connection.
    pub fn next(self) -> Self {
        match self {
            PollStep::Minimums => PollStep::Maximums,
            PollStep::Maximums => PollStep::OutputState,
            PollStep::OutputState => PollStep::Display,
            PollStep::Display => PollStep::Setpoint,
            PollStep::Setpoint => PollStep::OutputState,
        }
    }

    fn from_kind(kind: CommandKind) -> Option<Self> {
        match kind {
            CommandKind::GetMinimumVoltageCurrent => Some(PollStep::Minimums),
            CommandKind::GetMaximumVoltageCurrent => Some(PollStep::Maximums),
            CommandKind::GetOnOff => Some(PollStep::OutputState),
            CommandKind::GetDisplayVoltageCurrent => Some(PollStep::Display),
            CommandKind::GetSetVoltageCurrent => Some(PollStep::Setpoint),
            CommandKind::SetOnOff | CommandKind::SetVoltageCurrent => None,
        }
    }
}

/// Where the sequencer is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not polling.
    Disconnected,
    /// Connected, waiting for the start-up delay before the first query.
    Connecting,
    /// Query sent, waiting for its outcome.
    Awaiting(PollStep),
    /// Outcome delivered, the next query goes out on the next tick.
    Received(PollStep),
}

/// Timing of the polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    /// How often the next command is considered.
    pub poll_interval: Duration,
    /// How long without a successful reply before the connection is presumed dead.
    pub watchdog: Duration,
    /// Delay between connecting and the first query.
    pub startup_delay: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_ticks(250),
            watchdog: Duration::from_ticks(5_000),
            startup_delay: Duration::from_ticks(250),
        }
    }
}

impl SequencerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_startup_delay(mut self, startup_delay: Duration) -> Self {
        self.startup_delay = startup_delay;
        self
    }
}

/// The latest successfully read PSU state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupplyStatus {
    /// Lowest accepted set-point.
    pub minimum: Option<DecodedReading>,
    /// Highest accepted set-point.
    pub maximum: Option<DecodedReading>,
    /// Output state, or the requested one while a switch is pending.
    pub output: Option<State>,
    /// Measured output voltage, current and regulation mode.
    pub display: Option<DecodedReading>,
    /// Configured set-point, or the requested one until the PSU acknowledged it.
    pub setpoint: Option<SetPoint>,
}

/// Drives a [Mp7100] through the polling cycle.
///
/// Everything happens inside [Self::poll], [Self::receive] and the request methods, none of which block.
/// Call [Self::poll] at least as often as [SequencerConfig::poll_interval], or sleep until [Self::next_wakeup].
/// If bytes arrive on another thread than the one polling, share the sequencer behind a single mutex or
/// forward the bytes over a channel to the polling thread.
pub struct Sequencer<S: Write, H: Listener, const L: usize = 64> {
    psu: Mp7100<S, L>,
    listener: H,
    config: SequencerConfig,
    phase: Phase,
    next_tick: Option<Instant>,
    watchdog: Option<Instant>,
    pending_output: Option<State>,
    pending_setpoint: Option<SetPoint>,
    /// Set from requesting a set-point until the PSU has answered the write of it.
    setpoint_modified: bool,
    status: SupplyStatus,
}

impl<S: Write, H: Listener, const L: usize> Sequencer<S, H, L> {
    /// Create a disconnected sequencer. Nothing is sent until [Self::connect].
    pub fn new(interface: S, listener: H, config: SequencerConfig) -> Self {
        Self {
            psu: Mp7100::new(interface),
            listener,
            config,
            phase: Phase::Disconnected,
            next_tick: None,
            watchdog: None,
            pending_output: None,
            pending_setpoint: None,
            setpoint_modified: false,
            status: SupplyStatus::default(),
        }
    }

    /// Start polling from scratch, beginning with the bounds.
    ///
    /// Anything outstanding from an earlier connection is resolved as timed out first.
    pub fn connect(&mut self, now: Instant) {
        self.disconnect();
        info!("connecting");
        self.status = SupplyStatus {
            output: self.pending_output,
            setpoint: self.pending_setpoint,
            ..Default::default()
        };
        self.setpoint_modified = self.pending_setpoint.is_some();
        self.phase = Phase::Connecting;
        let start = now + self.config.startup_delay;
        self.next_tick = Some(start);
        self.watchdog = Some(start + self.config.watchdog);
    }

    /// Stop polling.
    pub fn disconnect(&mut self) {
        self.phase = Phase::Disconnected;
        self.next_tick = None;
        self.watchdog = None;
        if let Some(outcome) = self.psu.reset() {
            self.listener.outcome(&outcome);
        }
    }

    /// Switch the output on or off, ahead of the next query.
    pub fn request_output(&mut self, state: impl Into<State>) {
        let state = state.into();
        info!("switch {}", if bool::from(state) { "ON" } else { "OFF" });
        self.pending_output = Some(state);
        self.status.output = Some(state);
    }

    /// Write a new set-point, ahead of the next query.
    ///
    /// Once the bounds have been read, set-points outside of them are rejected.
    pub fn request_setpoint(&mut self, setpoint: SetPoint) -> Result<(), OutOfRange> {
        if let (Some(minimum), Some(maximum)) = (self.status.minimum, self.status.maximum) {
            if !setpoint.within(&minimum, &maximum) {
                return Err(OutOfRange);
            }
        }
        info!(
            "set voltage to {} cV, current to {} mA",
            setpoint.voltage_cv(),
            setpoint.current_ma()
        );
        self.pending_setpoint = Some(setpoint);
        self.setpoint_modified = true;
        self.status.setpoint = Some(setpoint);
        Ok(())
    }

    /// Feed bytes received from the PSU.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) {
        if let Some(outcome) = self.psu.receive(bytes, now) {
            self.handle_outcome(outcome, now);
        }
    }

    /// Let time pass: times out the outstanding command, checks the watchdog and sends the next command when due.
    pub fn poll(&mut self, now: Instant) {
        if let Some(outcome) = self.psu.poll(now) {
            self.handle_outcome(outcome, now);
        }

        if self.watchdog.is_some_and(|deadline| now >= deadline) {
            if self.phase != Phase::Connecting {
                warn!("watchdog timeout");
            }
            self.disconnect();
            self.listener.connection_lost();
            return;
        }

        if let Some(tick) = self.next_tick.filter(|tick| now >= *tick) {
            let next = tick + self.config.poll_interval;
            // Skip ticks we are too late for rather than bursting through them.
            self.next_tick = Some(if now >= next { now + self.config.poll_interval } else { next });
            self.tick(now);
        }
    }

    /// The earliest instant [Self::poll] has something to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        [self.psu.deadline(), self.next_tick, self.watchdog]
            .into_iter()
            .flatten()
            .min()
    }

    fn tick(&mut self, now: Instant) {
        if self.psu.is_busy() {
            return;
        }

        if let Some(state) = self.pending_output {
            if self.submit(Command::SetOnOff(state), now) {
                self.pending_output = None;
            }
            return;
        }
        if let Some(setpoint) = self.pending_setpoint {
            if self.submit(Command::SetVoltageCurrent(setpoint), now) {
                self.pending_setpoint = None;
            }
            return;
        }

        let step = match self.phase {
            Phase::Connecting => PollStep::Minimums,
            Phase::Received(step) => step.next(),
            Phase::Disconnected | Phase::Awaiting(_) => return,
        };
        if self.submit(step.command(), now) {
            self.phase = Phase::Awaiting(step);
        }
    }

    /// Returns whether the command went out. A failed send is retried on the next tick.
    fn submit(&mut self, command: Command, now: Instant) -> bool {
        match self.psu.submit(command, now) {
            Ok(displaced) => {
                if let Some(outcome) = displaced {
                    self.handle_outcome(outcome, now);
                }
                true
            }
            Err(err) => {
                error!("sending {} failed: {}", command.kind().mnemonic(), err);
                false
            }
        }
    }

    fn handle_outcome(&mut self, outcome: Outcome, now: Instant) {
        let ok = outcome.is_success();
        if ok && self.phase != Phase::Disconnected {
            self.watchdog = Some(now + self.config.watchdog);
        }

        match PollStep::from_kind(outcome.kind) {
            Some(step) => {
                if self.phase == Phase::Awaiting(step) {
                    self.phase = Phase::Received(step);
                }
                if ok {
                    self.record(step, &outcome.reading);
                } else if matches!(step, PollStep::Minimums | PollStep::Maximums) {
                    warn!("{} voltage/current: FAILED", step_name(step));
                }
            }
            None => {
                // A refused write is not resent, so the PSU's own set-point is what counts again.
                if outcome.kind == CommandKind::SetVoltageCurrent && self.pending_setpoint.is_none() {
                    self.setpoint_modified = false;
                }
                if !ok {
                    warn!("{} not acknowledged", outcome.kind.mnemonic());
                }
            }
        }

        self.listener.outcome(&outcome);
    }

    fn record(&mut self, step: PollStep, reading: &DecodedReading) {
        match step {
            PollStep::Minimums | PollStep::Maximums => {
                info!(
                    "{} voltage: {} cV, current: {} mA",
                    step_name(step),
                    reading.voltage_cv,
                    reading.current_ma
                );
                if step == PollStep::Minimums {
                    self.status.minimum = Some(*reading);
                } else {
                    self.status.maximum = Some(*reading);
                }
            }
            PollStep::OutputState => {
                if self.pending_output.is_none() {
                    self.status.output = Some(reading.output);
                }
            }
            PollStep::Display => self.status.display = Some(*reading),
            PollStep::Setpoint => {
                if !self.setpoint_modified {
                    self.status.setpoint = reading.as_setpoint();
                }
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase != Phase::Disconnected
    }

    pub fn status(&self) -> &SupplyStatus {
        &self.status
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn psu(&self) -> &Mp7100<S, L> {
        &self.psu
    }

    pub fn listener(&self) -> &H {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut H {
        &mut self.listener
    }

    /// Swap in a new interface, e.g. a reopened serial port before [Self::connect], returning the old one.
    pub fn replace_interface(&mut self, interface: S) -> S {
        self.psu.replace_interface(interface)
    }
}

fn step_name(step: PollStep) -> &'static str {
    match step {
        PollStep::Minimums => "minimum",
        _ => "maximum",
    }
}
