//! Modbus protocol constants used by the server
//!
//! These constants are derived from the official Modbus specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - Register/coil limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Full MBAP header length for TCP, including the unit id
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Minimum MBAP length field value (Unit ID + Function Code)
pub const MIN_MBAP_LENGTH: usize = 2;

/// Minimum RTU frame: Slave Address(1) + Function Code(1) + CRC(2)
pub const MIN_RTU_FRAME_LEN: usize = 4;

/// Maximum RTU ADU size
pub const MAX_RTU_FRAME_LEN: usize = 256;

/// RTU CRC length
pub const RTU_CRC_LEN: usize = 2;

/// Number of addressable entries in each register bank
pub const BANK_SIZE: usize = 65536;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// RTU broadcast address; requests are executed but never answered
pub const RTU_BROADCAST_UNIT: u8 = 0;

/// Highest individual slave address on a serial line
pub const MAX_RTU_UNIT: u8 = 247;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: 1 (FC) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: 1 + 2 + 2 + 1 + N × 2 ≤ 253 → N ≤ 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
///
/// Response PDU: 1 + 1 + ceil(N / 8) ≤ 253; the specification rounds to 2000
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
///
/// Request PDU: 1 + 2 + 2 + 1 + ceil(N / 8) ≤ 253; the specification uses 0x7B0
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Coil ON value for FC05
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value for FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Slave Device Failure
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Slave Device Busy
pub const EXCEPTION_SLAVE_DEVICE_BUSY: u8 = 0x06;

/// Negative Acknowledge
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Modbus/TCP Security
// ============================================================================

/// Object identifier of the private X.509 extension carrying the client role
pub const ROLE_EXTENSION_OID: &str = "1.3.6.1.4.1.50316.802.1";

/// Arcs of [`ROLE_EXTENSION_OID`]
pub const ROLE_EXTENSION_ARCS: [u64; 9] = [1, 3, 6, 1, 4, 1, 50316, 802, 1];
