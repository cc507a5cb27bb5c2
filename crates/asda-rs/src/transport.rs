use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};

use crate::cmds::{DEFAULT_JOG_SPEED, REG_ERROR, REG_JOG, REG_VERSION};
use crate::error::TransportError;
use crate::modbus::{self, Request};

/// Blocking register access on a half-duplex bus.
///
/// One request is in flight at a time; callers serialize access through
/// `&mut self`.
pub trait RegisterTransport: Send {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError>;
    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        (**self).read_register(address)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        (**self).write_register(address, value)
    }
}

/// Byte stream a Modbus RTU master can run on.
pub trait BusStream: Read + Write + Send {
    /// Drop whatever the device sent that nobody has read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl BusStream for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Modbus RTU over a byte stream, normally a `Box<dyn SerialPort>`.
pub struct RtuTransport<S> {
    stream: S,
    slave: u8,
}

impl<S: BusStream> RtuTransport<S> {
    pub fn new(stream: S, slave: u8) -> Self {
        Self { stream, slave }
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn exchange(&mut self, request: Request) -> Result<u16, TransportError> {
        // a late reply to an earlier request would otherwise be read as this one's
        self.stream.discard_input()?;
        let frame = request.encode(self.slave);
        trace!("tx {:02x?}", frame);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        modbus::read_response(&mut self.stream, self.slave, &request)
    }
}

impl<S: BusStream> RegisterTransport for RtuTransport<S> {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        let value = self.exchange(Request::ReadHolding { address })?;
        debug!("read  reg {} -> {}", address, value);
        Ok(value)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.exchange(Request::WriteSingle { address, value })?;
        debug!("write reg {} <- {}", address, value);
        Ok(())
    }
}

/// How often a failed exchange is repeated.
///
/// The default makes no extra attempt, so a timeout fails the call at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub attempts: u32,
    /// Pause before each extra attempt, milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Applies a [`RetryPolicy`] to transient failures of the inner transport.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: RegisterTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn run<R>(
        &mut self,
        op: &'static str,
        address: u16,
        mut call: impl FnMut(&mut T) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut attempt = 0;
        loop {
            match call(&mut self.inner) {
                Err(err) if err.is_transient() && attempt < self.policy.attempts => {
                    attempt += 1;
                    warn!(
                        op = op, address = address, attempt = attempt;
                        "{} of register {} failed ({}), retrying", op, address, err
                    );
                    thread::sleep(self.policy.backoff());
                }
                result => return result,
            }
        }
    }
}

impl<T: RegisterTransport> RegisterTransport for RetryingTransport<T> {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        self.run("read", address, |inner| inner.read_register(address))
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.run("write", address, |inner| inner.write_register(address, value))
    }
}

/// Firmware version reported by [`MemoryTransport`]
pub const SIMULATED_FIRMWARE: u16 = 1520;

#[derive(Debug, Default)]
struct SimulatedDrive {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, u16)>,
    failing_reads: usize,
    failing_writes: usize,
}

/// An in-memory amplifier: a register file plus a log of every write.
///
/// Clones share the same drive, so a test can keep one handle while the
/// controller owns another.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    drive: Arc<Mutex<SimulatedDrive>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A healthy drive with no alarm and the default JOG speed stored.
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert(REG_VERSION, SIMULATED_FIRMWARE);
        registers.insert(REG_ERROR, 0);
        registers.insert(REG_JOG, DEFAULT_JOG_SPEED);
        Self {
            drive: Arc::new(Mutex::new(SimulatedDrive {
                registers,
                ..Default::default()
            })),
        }
    }

    fn drive(&self) -> MutexGuard<'_, SimulatedDrive> {
        self.drive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a register without logging it as a bus write
    pub fn set_register(&self, address: u16, value: u16) {
        self.drive().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.drive().registers.get(&address).copied()
    }

    /// Every successful write, oldest first
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.drive().writes.clone()
    }

    /// Values written to P4-05, oldest first
    pub fn jog_writes(&self) -> Vec<u16> {
        self.drive()
            .writes
            .iter()
            .filter(|(address, _)| *address == REG_JOG)
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.drive().writes.clear();
    }

    /// Make the next `count` reads time out
    pub fn fail_next_reads(&self, count: usize) {
        self.drive().failing_reads = count;
    }

    /// Make the next `count` writes time out
    pub fn fail_next_writes(&self, count: usize) {
        self.drive().failing_writes = count;
    }
}

impl RegisterTransport for MemoryTransport {
    fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
        let mut drive = self.drive();
        if drive.failing_reads > 0 {
            drive.failing_reads -= 1;
            return Err(TransportError::Timeout);
        }
        drive
            .registers
            .get(&address)
            .copied()
            // illegal data address
            .ok_or(TransportError::Exception { function: modbus::FC_READ_HOLDING, code: 0x02 })
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let mut drive = self.drive();
        if drive.failing_writes > 0 {
            drive.failing_writes -= 1;
            return Err(TransportError::Timeout);
        }
        drive.registers.insert(address, value);
        drive.writes.push((address, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Simulated line: every flushed request releases the next canned reply
    struct Loopback {
        rx: VecDeque<u8>,
        replies: VecDeque<Vec<u8>>,
        tx: Vec<u8>,
    }

    impl Loopback {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                rx: VecDeque::new(),
                replies: replies.into(),
                tx: Vec::new(),
            }
        }

        /// Bytes already waiting before the next request goes out
        fn with_pending(mut self, bytes: &[u8]) -> Self {
            self.rx.extend(bytes);
            self
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rx.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(())
        }
    }

    impl BusStream for Loopback {
        fn discard_input(&mut self) -> io::Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&modbus::crc16(body).to_le_bytes());
        frame
    }

    #[test]
    fn rtu_read_sends_request_and_decodes_value() {
        let stream = Loopback::new(vec![framed(&[0x05, 0x03, 0x02, 0x00, 0x07])]);
        let mut rtu = RtuTransport::new(stream, 5);
        assert_eq!(rtu.slave(), 5);
        assert_eq!(rtu.read_register(REG_ERROR).unwrap(), 7);
        let sent = rtu.into_inner().tx;
        assert_eq!(&sent[..6], &[0x05, 0x03, 0x00, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn rtu_silence_is_reported_as_failure() {
        let mut rtu = RtuTransport::new(Loopback::new(Vec::new()), 1);
        assert!(rtu.write_register(REG_JOG, 100).is_err());
    }

    #[test]
    fn rtu_late_reply_does_not_poison_later_exchanges() {
        let echo = Request::WriteSingle { address: REG_JOG, value: 4999 }.encode(1).to_vec();
        let stream = Loopback::new(vec![echo, framed(&[0x01, 0x03, 0x02, 0x00, 0x00])])
            .with_pending(&framed(&[0x01, 0x03, 0x02, 0x00, 0x14]));
        let mut rtu = RtuTransport::new(stream, 1);

        rtu.write_register(REG_JOG, 4999).unwrap();
        assert_eq!(rtu.read_register(REG_ERROR).unwrap(), 0);
    }

    #[test]
    fn rtu_recovers_after_an_unexpected_frame() {
        // reply to a read arrives where a write echo was expected
        let stray = framed(&[0x01, 0x03, 0x02, 0x00, 0x14]);
        let stream = Loopback::new(vec![stray, framed(&[0x01, 0x03, 0x02, 0x00, 0x2A])]);
        let mut rtu = RtuTransport::new(stream, 1);

        assert!(matches!(rtu.write_register(REG_JOG, 100), Err(TransportError::Malformed(_))));
        assert_eq!(rtu.read_register(REG_JOG).unwrap(), 42);
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let drive = MemoryTransport::new();
        drive.fail_next_writes(2);
        let policy = RetryPolicy { attempts: 2, backoff_ms: 0 };
        let mut transport = RetryingTransport::new(drive.clone(), policy);
        assert_eq!(transport.policy(), policy);
        transport.write_register(REG_JOG, 300).unwrap();
        assert_eq!(drive.writes(), vec![(REG_JOG, 300)]);
    }

    #[test]
    fn default_policy_does_not_retry() {
        let drive = MemoryTransport::new();
        drive.fail_next_reads(1);
        let mut transport = RetryingTransport::new(drive.clone(), RetryPolicy::default());
        assert!(matches!(transport.read_register(REG_JOG), Err(TransportError::Timeout)));
        assert_eq!(transport.read_register(REG_JOG).unwrap(), DEFAULT_JOG_SPEED);
    }

    #[test]
    fn exceptions_are_never_retried() {
        let drive = MemoryTransport::new();
        let mut transport = RetryingTransport::new(
            drive,
            RetryPolicy { attempts: 5, backoff_ms: 0 },
        );
        assert!(matches!(
            transport.read_register(0x7777),
            Err(TransportError::Exception { code: 0x02, .. })
        ));
    }
}
