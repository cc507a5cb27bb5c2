//! Modbus RTU framing for the two functions the JOG protocol needs.
//!
//! Every request is a fixed 8 byte frame:
//!
//! ```text
//! [slave, function, addr_hi, addr_lo, data_hi, data_lo, crc_lo, crc_hi]
//! ```
//!
//! Responses are 7 bytes for a single register read, an 8 byte echo for a
//! single register write, or a 5 byte exception frame.

use std::io::Read;

use log::trace;

use crate::error::TransportError;

/// Read holding registers
pub const FC_READ_HOLDING: u8 = 0x03;
/// Write single register
pub const FC_WRITE_SINGLE: u8 = 0x06;
/// Set on the function byte of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

const REQUEST_LEN: usize = 8;
const READ_RESPONSE_LEN: usize = 7;
const WRITE_RESPONSE_LEN: usize = 8;
const EXCEPTION_LEN: usize = 5;

/// CRC-16/MODBUS (reflected 0x8005, initial 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// A single register request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    ReadHolding { address: u16 },
    WriteSingle { address: u16, value: u16 },
}

impl Request {
    pub fn function(&self) -> u8 {
        match self {
            Request::ReadHolding { .. } => FC_READ_HOLDING,
            Request::WriteSingle { .. } => FC_WRITE_SINGLE,
        }
    }

    pub fn address(&self) -> u16 {
        match *self {
            Request::ReadHolding { address } | Request::WriteSingle { address, .. } => address,
        }
    }

    fn response_len(&self) -> usize {
        match self {
            Request::ReadHolding { .. } => READ_RESPONSE_LEN,
            Request::WriteSingle { .. } => WRITE_RESPONSE_LEN,
        }
    }

    /// Build the RTU frame addressed to `slave`.
    pub fn encode(&self, slave: u8) -> [u8; REQUEST_LEN] {
        let data = match *self {
            // quantity: one register
            Request::ReadHolding { .. } => 1,
            Request::WriteSingle { value, .. } => value,
        };
        let [addr_hi, addr_lo] = self.address().to_be_bytes();
        let [data_hi, data_lo] = data.to_be_bytes();
        let mut frame = [slave, self.function(), addr_hi, addr_lo, data_hi, data_lo, 0, 0];
        let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
        frame[6] = crc_lo;
        frame[7] = crc_hi;
        frame
    }
}

fn check_crc(frame: &[u8]) -> Result<(), TransportError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    if expected != actual {
        return Err(TransportError::Crc { expected, actual });
    }
    Ok(())
}

/// Read and validate the response to `request`.
///
/// Returns the register value for reads and the echoed value for writes.
pub fn read_response<R: Read>(
    port: &mut R,
    slave: u8,
    request: &Request,
) -> Result<u16, TransportError> {
    let mut frame = [0u8; WRITE_RESPONSE_LEN];
    port.read_exact(&mut frame[..2])?;

    let function = frame[1];
    let len = if function == request.function() {
        request.response_len()
    } else if function == request.function() | EXCEPTION_FLAG {
        EXCEPTION_LEN
    } else {
        return Err(TransportError::Malformed("unexpected function code"));
    };
    port.read_exact(&mut frame[2..len])?;
    trace!("rx {:02x?}", &frame[..len]);

    check_crc(&frame[..len])?;
    if frame[0] != slave {
        return Err(TransportError::Malformed("response from a different slave"));
    }
    if len == EXCEPTION_LEN {
        return Err(TransportError::Exception {
            function: request.function(),
            code: frame[2],
        });
    }

    match *request {
        Request::ReadHolding { .. } => {
            if frame[2] != 2 {
                return Err(TransportError::Malformed("unexpected byte count"));
            }
            Ok(u16::from_be_bytes([frame[3], frame[4]]))
        }
        Request::WriteSingle { value, .. } => {
            if frame[..6] != request.encode(slave)[..6] {
                return Err(TransportError::Malformed("write echo does not match request"));
            }
            Ok(value)
        }
    }
}
