use std::{
    env,
    io::Read,
    sync::mpsc,
    thread,
    time::{Duration, Instant as StdInstant},
};

use inquire::Select;
use mp7100::{
    sequencer::{Listener, Sequencer, SequencerConfig},
    types::{CommandKind, Instant, Outcome, SetPoint, State},
};
use serialport::SerialPort;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
// Short, so the reader thread notices a closed port quickly.
const SERIAL_TIMEOUT_MS: u64 = 50;
const RUN_TIME_S: u64 = 30;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Prints what the PSU reports.
struct Printer;

impl Listener for Printer {
    fn outcome(&mut self, outcome: &Outcome) {
        let reading = &outcome.reading;
        if !reading.success {
            println!("{:?}: FAILED", outcome.kind);
            return;
        }
        match outcome.kind {
            CommandKind::GetDisplayVoltageCurrent => println!(
                "{:05.2} V  {:05.3} A  {:?}",
                reading.volts(),
                reading.amps(),
                reading.mode
            ),
            CommandKind::GetMinimumVoltageCurrent | CommandKind::GetMaximumVoltageCurrent => println!(
                "{:?}: {:.2} V, {:.3} A",
                outcome.kind,
                reading.volts(),
                reading.amps()
            ),
            _ => {}
        }
    }

    fn connection_lost(&mut self) {
        println!("Connection lost!");
    }
}

/// Forward everything the port receives to the control loop.
fn spawn_reader(mut port: Box<dyn SerialPort>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    eprintln!("Read error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Usage: serial [port] [volts amps]
    let args: Vec<String> = env::args().collect();

    // Get serial port from command line arg or interactive selection
    let port_name = args.get(1).cloned().unwrap_or_else(|| {
        // List available serial ports
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        // Interactive selection
        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let setpoint = match (args.get(2), args.get(3)) {
        (Some(volts), Some(amps)) => {
            let volts: f32 = volts.parse().expect("Invalid voltage");
            let amps: f32 = amps.parse().expect("Invalid current");
            Some(SetPoint::from_volts_amps(volts, amps).expect("Set-point out of range"))
        }
        _ => None,
    };

    println!("Using port: {}", port_name);

    // Open serial port
    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");
    let bytes = spawn_reader(port.try_clone().expect("Failed to clone serial port"));

    let mut sequencer: Sequencer<PortWrapper, Printer> =
        Sequencer::new(PortWrapper(port), Printer, SequencerConfig::default());

    let clock = StdInstant::now();

    sequencer.connect(now(clock));
    if let Some(setpoint) = setpoint {
        // Checked against the PSU's bounds only once they are known, which they are not yet.
        sequencer.request_setpoint(setpoint).expect("Set-point out of range");
    }

    run_for(&mut sequencer, &bytes, clock, Duration::from_secs(RUN_TIME_S));

    if sequencer.is_connected() && sequencer.status().output == Some(State::On) {
        println!("Switching output off");
        sequencer.request_output(State::Off);
        run_for(&mut sequencer, &bytes, clock, Duration::from_secs(2));
    }

    println!("Final status: {:#?}", sequencer.status());
}

fn now(clock: StdInstant) -> Instant {
    Instant::from_ticks(clock.elapsed().as_millis() as u64)
}

/// One loop handles received bytes and the passing of time, so the sequencer is never shared.
fn run_for(
    sequencer: &mut Sequencer<PortWrapper, Printer>,
    bytes: &mpsc::Receiver<Vec<u8>>,
    clock: StdInstant,
    duration: Duration,
) {
    let until = clock.elapsed() + duration;
    while clock.elapsed() < until && sequencer.is_connected() {
        let wait = sequencer
            .next_wakeup()
            .map(|at| at.ticks().saturating_sub(now(clock).ticks()))
            .unwrap_or(SERIAL_TIMEOUT_MS);
        match bytes.recv_timeout(Duration::from_millis(wait)) {
            Ok(received) => sequencer.receive(&received, now(clock)),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        sequencer.poll(now(clock));
    }
}
