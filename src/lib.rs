//! This crate provides an interface for communicating with and controlling the MP7100 series of bench power supplies.
//!
//! It supports `no-std` environments by use of the `no_std` feature flag.
//!
//! The PSU speaks a line based ASCII protocol, every command and reply ends with `\r`:
//!
//! | Command            | Reply                 | Reply  |
//! |--------------------|-----------------------|--------|
//! | `SOUT1` / `SOUT0`  |                       | `OK`   |
//! | `GOUT`             | `1` / `0`             | `OK`   |
//! | `SETD<uuuu><iiii>` |                       | `OK`   |
//! | `GETD`             | `<u>;<i>;<cc>`        | `OK`   |
//! | `GETS`             | `<u>;<i>`             | `OK`   |
//! | `GMIN`             | `<u>;<i>`             | `OK`   |
//! | `GMAX`             | `<u>;<i>`             | `OK`   |
//!
//! Voltages are in centivolts and currents in milliamps.
//!
//! There are two layers:
//! * [psu::Mp7100] sends one command at a time and decodes its reply, or times it out.
//! * [sequencer::Sequencer] keeps the PSU polled and sends output and set-point changes on request.
//!
//! Neither reads from the serial port or keeps time on its own, so they work with any executor, RTOS or
//! plain loop. Hand received bytes to `receive` and call `poll` with the current time.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

#![cfg_attr(feature = "no_std", no_std)]

pub mod command;
pub mod error;
mod framer;
pub mod psu;
pub mod sequencer;
mod stage;
pub mod types;

#[cfg(test)]
mod mock_serial;
