//! Modbus protocol exceptions
//!
//! Handlers report failure exclusively through [`Exception`], so that every
//! failure is encoded on the wire the same way: the function code with the
//! high bit set, followed by a single exception-code byte.

use std::fmt;

use crate::constants::*;

/// Protocol exception returned by a function handler.
///
/// [`Exception::Success`] is the "no exception" sentinel. It is a variant in
/// its own right and is never written to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exception {
    /// No exception.
    Success,
    /// The function code is not supported by the server.
    IllegalFunction,
    /// The requested address range is outside the register bank.
    IllegalDataAddress,
    /// A value in the request payload is not acceptable.
    IllegalDataValue,
    /// Unrecoverable error while performing the request.
    SlaveDeviceFailure,
    /// Request accepted, processing takes a long time.
    Acknowledge,
    /// Server is busy with a long-running command.
    SlaveDeviceBusy,
    /// Server cannot perform the program function.
    NegativeAcknowledge,
    /// Memory parity error in extended memory.
    MemoryParityError,
    /// Gateway could not allocate a path.
    GatewayPathUnavailable,
    /// Gateway target did not respond.
    GatewayTargetFailedToRespond,
}

impl Exception {
    /// Numeric wire code. `Success` maps to 0, which is never sent.
    pub fn code(self) -> u8 {
        match self {
            Exception::Success => 0x00,
            Exception::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Exception::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Exception::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            Exception::SlaveDeviceFailure => EXCEPTION_SLAVE_DEVICE_FAILURE,
            Exception::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            Exception::SlaveDeviceBusy => EXCEPTION_SLAVE_DEVICE_BUSY,
            Exception::NegativeAcknowledge => EXCEPTION_NEGATIVE_ACKNOWLEDGE,
            Exception::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            Exception::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            Exception::GatewayTargetFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
        }
    }

    /// Map a wire code back to an exception. Code 0 is not a wire value and
    /// yields `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        let exception = match code {
            EXCEPTION_ILLEGAL_FUNCTION => Exception::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Exception::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Exception::IllegalDataValue,
            EXCEPTION_SLAVE_DEVICE_FAILURE => Exception::SlaveDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => Exception::Acknowledge,
            EXCEPTION_SLAVE_DEVICE_BUSY => Exception::SlaveDeviceBusy,
            EXCEPTION_NEGATIVE_ACKNOWLEDGE => Exception::NegativeAcknowledge,
            EXCEPTION_MEMORY_PARITY_ERROR => Exception::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Exception::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => Exception::GatewayTargetFailedToRespond,
            _ => return None,
        };
        Some(exception)
    }

    /// True for the `Success` sentinel.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Exception::Success
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Exception::Success => "success",
            Exception::IllegalFunction => "illegal function",
            Exception::IllegalDataAddress => "illegal data address",
            Exception::IllegalDataValue => "illegal data value",
            Exception::SlaveDeviceFailure => "slave device failure",
            Exception::Acknowledge => "acknowledge",
            Exception::SlaveDeviceBusy => "slave device busy",
            Exception::NegativeAcknowledge => "negative acknowledge",
            Exception::MemoryParityError => "memory parity error",
            Exception::GatewayPathUnavailable => "gateway path unavailable",
            Exception::GatewayTargetFailedToRespond => "gateway target device failed to respond",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Exception; 10] = [
        Exception::IllegalFunction,
        Exception::IllegalDataAddress,
        Exception::IllegalDataValue,
        Exception::SlaveDeviceFailure,
        Exception::Acknowledge,
        Exception::SlaveDeviceBusy,
        Exception::NegativeAcknowledge,
        Exception::MemoryParityError,
        Exception::GatewayPathUnavailable,
        Exception::GatewayTargetFailedToRespond,
    ];

    #[test]
    fn test_codes_are_unique_and_reversible() {
        for exception in ALL {
            assert_ne!(exception.code(), 0);
            assert_eq!(Exception::from_code(exception.code()), Some(exception));
        }
    }

    #[test]
    fn test_success_is_not_a_wire_code() {
        assert!(Exception::Success.is_success());
        assert_eq!(Exception::from_code(0), None);
        assert!(ALL.iter().all(|e| !e.is_success()));
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(Exception::IllegalFunction.code(), 0x01);
        assert_eq!(Exception::IllegalDataAddress.code(), 0x02);
        assert_eq!(Exception::GatewayTargetFailedToRespond.code(), 0x0B);
        assert_eq!(Exception::from_code(0x09), None);
    }
}
