//! Internal error types for the server
//!
//! These errors never reach the wire. Protocol-level failures are expressed
//! with [`Exception`](crate::exception::Exception) instead; a [`ModbusError`]
//! always terminates the connection it occurred on, except for
//! [`ModbusError::Exception`], which only surfaces from register access made
//! through [`Server::with_registers`](crate::Server::with_registers).

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::exception::Exception;

/// Result type alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by framing, transports and the server lifecycle.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// I/O error on a socket, serial port or file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame could not be decoded (bad envelope, length mismatch, CRC).
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// TLS configuration or handshake failure.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// Certificate or key material could not be loaded or parsed.
    #[error("Certificate error: {message}")]
    Certificate { message: String },

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {message}")]
    Serial { message: String },

    /// Operation did not finish in time.
    #[error("Timeout: {operation} exceeded {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The request serializer is no longer running.
    #[error("Server closed")]
    ServerClosed,

    /// Invalid server configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Register access outside a request failed with a protocol exception.
    #[error("Modbus exception: {0}")]
    Exception(#[from] Exception),
}

impl ModbusError {
    /// Create a malformed-frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create a certificate error.
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }

    /// Create a serial port error.
    pub fn serial(message: impl Into<String>) -> Self {
        Self::Serial {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// True when the error is a peer closing the stream, which is not worth
    /// reporting as a failure.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

#[cfg(feature = "rtu")]
impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::serial(err.to_string())
    }
}

#[cfg(feature = "tls")]
impl From<rustls::Error> for ModbusError {
    fn from(err: rustls::Error) -> Self {
        Self::tls(err.to_string())
    }
}
