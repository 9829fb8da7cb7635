//! # Server Configuration
//!
//! Per-request protocol limits and the timeouts of the request pipeline.
//!
//! ## Modbus Specification Limits
//!
//! - **Read Holding/Input Registers (FC03/04)**: Max 125 registers per request
//! - **Read Coils/Discrete Inputs (FC01/02)**: Max 2000 bits per request
//! - **Write Multiple Registers (FC16)**: Max 123 registers per request
//! - **Write Multiple Coils (FC15)**: Max 1968 coils per request
//!
//! A slave may advertise lower limits; requests above them are answered with
//! `IllegalDataValue`.

use std::time::Duration;

use crate::constants::{
    BANK_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// Default time a connection waits for the serializer to answer a request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default time allowed for a TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default handler run time above which a warning is logged.
pub const DEFAULT_HANDLER_BUDGET_MS: u64 = 100;

/// Default silent interval that terminates an RTU frame of unknown length.
pub const DEFAULT_RTU_FRAME_GAP_MS: u64 = 5;

/// Per-request quantity limits enforced by the default handlers.
///
/// # Example
///
/// ```rust
/// use voltage_modbus_server::RequestLimits;
///
/// let limits = RequestLimits::new().with_max_read_registers(50);
///
/// assert_eq!(limits.max_read_registers, 50);
/// assert!(!limits.is_read_within_limits(51));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum registers per read request.
    pub max_read_registers: u16,
    /// Maximum registers per write request.
    pub max_write_registers: u16,
    /// Maximum coils per read request.
    pub max_read_coils: u16,
    /// Maximum coils per write request.
    pub max_write_coils: u16,
}

impl RequestLimits {
    /// Create limits with the Modbus specification values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum read registers.
    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    /// Set maximum write registers.
    pub fn with_max_write_registers(mut self, count: u16) -> Self {
        self.max_write_registers = count;
        self
    }

    /// Set maximum read coils.
    pub fn with_max_read_coils(mut self, count: u16) -> Self {
        self.max_read_coils = count;
        self
    }

    /// Set maximum write coils.
    pub fn with_max_write_coils(mut self, count: u16) -> Self {
        self.max_write_coils = count;
        self
    }

    /// Check if a register read quantity is acceptable.
    pub fn is_read_within_limits(&self, register_count: u16) -> bool {
        (1..=self.max_read_registers).contains(&register_count)
    }

    /// Check if a register write quantity is acceptable.
    pub fn is_write_within_limits(&self, register_count: u16) -> bool {
        (1..=self.max_write_registers).contains(&register_count)
    }

    /// Check if a coil read quantity is acceptable.
    pub fn is_coil_read_within_limits(&self, coil_count: u16) -> bool {
        (1..=self.max_read_coils).contains(&coil_count)
    }

    /// Check if a coil write quantity is acceptable.
    pub fn is_coil_write_within_limits(&self, coil_count: u16) -> bool {
        (1..=self.max_write_coils).contains(&coil_count)
    }

    fn validate(&self) -> ModbusResult<()> {
        if self.max_read_registers == 0 || self.max_read_registers > MAX_READ_REGISTERS {
            return Err(ModbusError::config(format!(
                "max_read_registers must be 1..={MAX_READ_REGISTERS}"
            )));
        }
        if self.max_write_registers == 0 || self.max_write_registers > MAX_WRITE_REGISTERS {
            return Err(ModbusError::config(format!(
                "max_write_registers must be 1..={MAX_WRITE_REGISTERS}"
            )));
        }
        if self.max_read_coils == 0 || self.max_read_coils > MAX_READ_COILS {
            return Err(ModbusError::config(format!(
                "max_read_coils must be 1..={MAX_READ_COILS}"
            )));
        }
        if self.max_write_coils == 0 || self.max_write_coils > MAX_WRITE_COILS {
            return Err(ModbusError::config(format!(
                "max_write_coils must be 1..={MAX_WRITE_COILS}"
            )));
        }
        Ok(())
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_read_registers: MAX_READ_REGISTERS,
            max_write_registers: MAX_WRITE_REGISTERS,
            max_read_coils: MAX_READ_COILS,
            max_write_coils: MAX_WRITE_COILS,
        }
    }
}

/// Server-wide settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_modbus_server::{RequestLimits, ServerConfig};
///
/// let config = ServerConfig::new()
///     .with_bank_size(1024)
///     .with_request_timeout(Duration::from_secs(2))
///     .with_limits(RequestLimits::new().with_max_read_coils(256));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Cells allocated per register bank (at most 65536).
    pub bank_size: usize,
    /// Quantity limits for the default handlers.
    pub limits: RequestLimits,
    /// How long a connection waits for its request to be answered before it
    /// is dropped.
    ///
    /// The clock starts when the frame has been read, so time spent queued
    /// behind other connections' requests counts against it. A worker that
    /// stays backlogged for longer than this closes the waiting connections
    /// rather than only slowing them down; size it above the worst expected
    /// queue wait.
    pub request_timeout: Duration,
    /// Upper bound on a TLS handshake.
    pub handshake_timeout: Duration,
    /// Handler run time above which a warning is logged.
    pub handler_budget: Duration,
    /// Inter-frame silence ending an RTU frame whose length cannot be derived
    /// from its function code.
    pub rtu_frame_gap: Duration,
}

impl ServerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the register bank size.
    pub fn with_bank_size(mut self, size: usize) -> Self {
        self.bank_size = size;
        self
    }

    /// Set the request limits.
    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the request timeout, queue wait included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the handler budget.
    pub fn with_handler_budget(mut self, budget: Duration) -> Self {
        self.handler_budget = budget;
        self
    }

    /// Set the RTU inter-frame gap.
    pub fn with_rtu_frame_gap(mut self, gap: Duration) -> Self {
        self.rtu_frame_gap = gap;
        self
    }

    /// Reject settings the server cannot honour.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.bank_size == 0 || self.bank_size > BANK_SIZE {
            return Err(ModbusError::config(format!(
                "bank_size must be 1..={BANK_SIZE}, got {}",
                self.bank_size
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ModbusError::config("request_timeout must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ModbusError::config("handshake_timeout must be non-zero"));
        }
        if self.rtu_frame_gap.is_zero() {
            return Err(ModbusError::config("rtu_frame_gap must be non-zero"));
        }
        self.limits.validate()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bank_size: BANK_SIZE,
            limits: RequestLimits::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            handler_budget: Duration::from_millis(DEFAULT_HANDLER_BUDGET_MS),
            rtu_frame_gap: Duration::from_millis(DEFAULT_RTU_FRAME_GAP_MS),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
