//! Splits the incoming byte stream into `\r` terminated reply lines.

use crate::types::TERMINATOR;

/// Receive buffer holding at most `L` bytes of not yet terminated reply.
#[derive(Debug, Default)]
pub struct LineFramer<const L: usize> {
    buffer: heapless::Vec<u8, L>,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl<const L: usize> LineFramer<L> {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            discarding: false,
        }
    }

    /// Feed received bytes, calling `on_line` for every completed line in order.
    ///
    /// Partial lines are kept for the next call. If a line outgrows the buffer it is dropped up to the next
    /// terminator, returning the number of bytes thrown away.
    pub fn push(&mut self, bytes: &[u8], mut on_line: impl FnMut(&[u8])) -> usize {
        let mut dropped = 0;
        for &byte in bytes {
            if byte == TERMINATOR {
                if !self.discarding {
                    on_line(&self.buffer);
                }
                self.discarding = false;
                self.buffer.clear();
            } else if self.discarding {
                dropped += 1;
            } else if self.buffer.push(byte).is_err() {
                dropped += self.buffer.len() + 1;
                self.buffer.clear();
                self.discarding = true;
            }
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}
