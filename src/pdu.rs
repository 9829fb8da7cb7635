//! PDU payload helpers
//!
//! The payload of a request frame is everything after the function code.
//! [`PduReader`] walks it in big-endian order and [`PduBuilder`] assembles a
//! response payload with a fluent API.

use tracing::debug;

use crate::exception::Exception;

/// Big-endian cursor over a request payload.
///
/// Running out of bytes yields [`Exception::IllegalDataValue`], which is what
/// the handlers report for truncated requests.
#[derive(Debug, Clone)]
pub struct PduReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PduReader<'a> {
    /// Start reading at the beginning of `data`.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read one byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Exception> {
        let byte = *self.data.get(self.pos).ok_or(Exception::IllegalDataValue)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a big-endian u16.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, Exception> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read exactly `len` bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Exception> {
        let end = self.pos.checked_add(len).ok_or(Exception::IllegalDataValue)?;
        let bytes = self.data.get(self.pos..end).ok_or(Exception::IllegalDataValue)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Response payload builder.
#[derive(Debug, Default)]
pub struct PduBuilder {
    data: Vec<u8>,
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with reserved capacity
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> Self {
        self.data.push(b);
        self
    }

    /// Add a big-endian u16
    #[inline]
    pub fn word(mut self, value: u16) -> Self {
        self.data.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Add big-endian u16 values
    #[inline]
    pub fn words(mut self, values: &[u16]) -> Self {
        for &value in values {
            self.data.extend_from_slice(&value.to_be_bytes());
        }
        self
    }

    /// Add raw data
    #[inline]
    pub fn data(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Finish the payload
    #[inline]
    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// Pack bits LSB-first into bytes, as used by FC01/FC02 responses and FC15
/// requests.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` bits LSB-first from `bytes`. Missing bytes read as zero.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            bytes
                .get(i / 8)
                .map(|byte| byte & (1 << (i % 8)) != 0)
                .unwrap_or(false)
        })
        .collect()
}

/// Get human-readable function code description
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & 0x7F {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        0x17 => "Read/Write Multiple Registers",
        _ => "Unknown Function",
    }
}

/// Log a decoded request at debug level.
pub(crate) fn log_request(unit_id: u8, fc: u8, payload: &[u8]) {
    debug!(
        "Request: unit={} FC={:02X} ({}), data_len={}",
        unit_id,
        fc,
        function_code_description(fc),
        payload.len()
    );
}
