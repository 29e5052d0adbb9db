//! # Command/Response Transport
//!
//! Byte-level exchange with the modem's AT control channel. A command is
//! written with a trailing carriage return and the reply is read back
//! under a byte budget and a wall-clock timeout. Nothing here looks at the
//! reply text; the session decides what `OK` means for each command.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::config::ModemConfig;
use crate::error::{Error, Result};

/// A half-duplex byte channel to the modem.
///
/// Implemented by [`SerialTransport`] and by scripted transports in tests.
pub trait Transport {
    /// Write raw bytes to the device.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `budget` bytes, returning early only when `timeout`
    /// elapses. A short or empty result is a normal outcome, not an error.
    fn read_bounded(&mut self, budget: usize, timeout: Duration) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn read_bounded(&mut self, budget: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read_bounded(budget, timeout)
    }
}

/// Send `command` terminated by `\r` and read back at most `budget` bytes.
pub fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    command: &str,
    budget: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(b'\r');
    transport.send(&line)?;
    transport.read_bounded(budget, timeout)
}

/// [`Transport`] over a real serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open the control channel named in `config`.
    pub fn open(config: &ModemConfig) -> Result<Self> {
        let port = serialport::new(&config.device, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| Error::DeviceUnavailable {
                path: config.device.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(device = %config.device, baud = config.baud_rate, "serial port opened");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_bounded(&mut self, budget: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; budget];
        let mut filled = 0;

        while filled < budget {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port
                .set_timeout(remaining)
                .map_err(std::io::Error::from)?;
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buf.truncate(filled);
        tracing::trace!(budget, received = filled, "serial read finished");
        Ok(buf)
    }
}
