//! Modbus frame codec
//!
//! A [`Frame`] is one protocol transaction: an envelope, a unit id, a
//! function code and a payload. TCP and RTU share the function-code/payload
//! core and differ only in the envelope around it:
//! - **TCP**: MBAP Header (transaction id, protocol id, length, unit id) + PDU
//! - **RTU**: Slave ID + PDU + CRC
//!
//! Dispatch only ever looks at the function code and payload, so handlers work
//! unchanged for both transports.

use bytes::Bytes;
use crc::{Crc, CRC_16_MODBUS};
use tracing::debug;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::exception::Exception;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Transport-specific part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// MBAP header fields. The length field is derived on encode.
    Tcp {
        transaction_id: u16,
        protocol_id: u16,
    },
    /// RTU carries no extra header; the CRC is derived on encode.
    Rtu,
}

/// One decoded Modbus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    envelope: Envelope,
    unit_id: u8,
    function: u8,
    payload: Bytes,
}

impl Frame {
    /// Build a TCP frame.
    pub fn tcp(transaction_id: u16, unit_id: u8, function: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            envelope: Envelope::Tcp {
                transaction_id,
                protocol_id: 0,
            },
            unit_id,
            function,
            payload: payload.into(),
        }
    }

    /// Build an RTU frame.
    pub fn rtu(unit_id: u8, function: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            envelope: Envelope::Rtu,
            unit_id,
            function,
            payload: payload.into(),
        }
    }

    /// Decode a complete MBAP frame.
    ///
    /// Fails when the buffer is shorter than the header plus function code,
    /// when the length field disagrees with the bytes that follow it, or when
    /// the protocol id is not 0.
    pub fn decode_tcp(raw: &[u8]) -> ModbusResult<Self> {
        if raw.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusError::malformed(format!(
                "TCP frame too short: {} bytes",
                raw.len()
            )));
        }

        let transaction_id = u16::from_be_bytes([raw[0], raw[1]]);
        let protocol_id = u16::from_be_bytes([raw[2], raw[3]]);
        let length = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        let unit_id = raw[6];

        // Length counts the unit id and everything after it
        if length != raw.len() - 6 {
            return Err(ModbusError::malformed(format!(
                "length field {} does not match {} remaining bytes",
                length,
                raw.len() - 6
            )));
        }
        if protocol_id != 0 {
            return Err(ModbusError::malformed(format!(
                "protocol id must be 0, got {}",
                protocol_id
            )));
        }

        let frame = Self {
            envelope: Envelope::Tcp {
                transaction_id,
                protocol_id,
            },
            unit_id,
            function: raw[MBAP_HEADER_LEN],
            payload: Bytes::copy_from_slice(&raw[MBAP_HEADER_LEN + 1..]),
        };

        debug!(
            "Parsed TCP frame: trans_id={:04X}, length={}, unit_id={}, FC={:02X}",
            transaction_id, length, unit_id, frame.function
        );

        Ok(frame)
    }

    /// Decode a complete RTU frame, verifying its CRC.
    pub fn decode_rtu(raw: &[u8]) -> ModbusResult<Self> {
        if raw.len() < MIN_RTU_FRAME_LEN {
            return Err(ModbusError::malformed(format!(
                "RTU frame too short: {} bytes",
                raw.len()
            )));
        }

        let body_len = raw.len() - RTU_CRC_LEN;
        let received = u16::from_le_bytes([raw[body_len], raw[body_len + 1]]);
        let calculated = MODBUS_CRC.checksum(&raw[..body_len]);
        if received != calculated {
            return Err(ModbusError::malformed(format!(
                "CRC mismatch: expected 0x{calculated:04X}, got 0x{received:04X}"
            )));
        }

        Ok(Self {
            envelope: Envelope::Rtu,
            unit_id: raw[0],
            function: raw[1],
            payload: Bytes::copy_from_slice(&raw[2..body_len]),
        })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self.envelope {
            Envelope::Tcp {
                transaction_id,
                protocol_id,
            } => {
                let length = (self.payload.len() + 2) as u16;
                let mut raw = Vec::with_capacity(MBAP_HEADER_LEN + 1 + self.payload.len());
                raw.extend_from_slice(&transaction_id.to_be_bytes());
                raw.extend_from_slice(&protocol_id.to_be_bytes());
                raw.extend_from_slice(&length.to_be_bytes());
                raw.push(self.unit_id);
                raw.push(self.function);
                raw.extend_from_slice(&self.payload);
                raw
            }
            Envelope::Rtu => {
                let mut raw = Vec::with_capacity(2 + self.payload.len() + RTU_CRC_LEN);
                raw.push(self.unit_id);
                raw.push(self.function);
                raw.extend_from_slice(&self.payload);
                let crc = MODBUS_CRC.checksum(&raw);
                raw.extend_from_slice(&crc.to_le_bytes());
                raw
            }
        }
    }

    /// Derive a response: same envelope, unit and function, empty payload.
    pub fn response(&self) -> Self {
        Self {
            envelope: self.envelope,
            unit_id: self.unit_id,
            function: self.function,
            payload: Bytes::new(),
        }
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Turn the frame into an exception response. `Success` leaves the frame
    /// untouched.
    pub fn set_exception(&mut self, exception: Exception) {
        if exception.is_success() {
            return;
        }
        self.function |= EXCEPTION_FLAG;
        self.payload = Bytes::copy_from_slice(&[exception.code()]);
    }

    /// Envelope of this frame.
    #[inline]
    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// Unit (slave) identifier.
    #[inline]
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Function code, including the exception bit if set.
    #[inline]
    pub fn function(&self) -> u8 {
        self.function
    }

    /// Payload after the function code.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Transaction id for TCP frames.
    #[inline]
    pub fn transaction_id(&self) -> Option<u16> {
        match self.envelope {
            Envelope::Tcp { transaction_id, .. } => Some(transaction_id),
            Envelope::Rtu => None,
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Exception carried by an exception response.
    pub fn exception(&self) -> Option<Exception> {
        if self.is_exception() {
            self.payload.first().and_then(|&code| Exception::from_code(code))
        } else {
            None
        }
    }
}

/// CRC-16/MODBUS of `data`, as appended little-endian to RTU frames.
pub fn rtu_crc(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}
