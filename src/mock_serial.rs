//! We use this mocking module in unit tests to emulate the sending half of a serial port.
//!
//! Replies are not read from the port, tests feed them straight into the state machine.

use thiserror::Error;

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 512>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
}

#[derive(Error, Debug)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    #[error("Mock buffer overflow")]
    BufferOverflow,
    /// Generic simulated error for testing
    #[error("Simulated error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with an empty buffer
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            should_error_on_write: false,
        }
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Written data split into `\r` terminated lines, terminators removed.
    pub fn written_lines(&self) -> Vec<String> {
        self.written_data()
            .split(|&b| b == b'\r')
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Write};

    #[test]
    fn test_new_mock_serial() {
        let mock = MockSerial::new();
        assert_eq!(mock.written_data().len(), 0);
        assert_eq!(mock.should_error_on_write, false);
    }

    #[test]
    fn test_write_lines() {
        let mut mock = MockSerial::new();
        mock.write_all(b"GOUT\r").unwrap();
        mock.write_all(b"GETD\r").unwrap();

        assert_eq!(mock.written_data(), b"GOUT\rGETD\r");
        assert_eq!(mock.written_lines(), vec!["GOUT", "GETD"]);
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 600]; // Larger than 512 byte capacity

        let result = mock.write(&large_data);
        assert!(matches!(result, Err(MockSerialError::BufferOverflow)));
    }

    #[test]
    fn test_write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);

        let result = mock.write(b"test");
        assert!(matches!(result, Err(MockSerialError::SimulatedError)));
        assert!(mock.flush().is_err());
        assert_eq!(mock.written_data().len(), 0); // Nothing should be written

        mock.set_write_error(false);
        assert!(mock.write(b"test").is_ok());
    }

    #[test]
    fn test_clear_written_data() {
        let mut mock = MockSerial::new();
        mock.write(b"test data").unwrap();
        assert!(!mock.written_data().is_empty());

        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            MockSerialError::BufferOverflow.kind(),
            embedded_io::ErrorKind::OutOfMemory
        ));
        assert!(matches!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::Other
        ));
    }
}
