//! # Voltage Modbus Server - Industrial Modbus Slave
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! A Modbus slave (server) in pure Rust that serves one register memory to
//! any number of Modbus/TCP, mutual-TLS and serial RTU masters.
//!
//! ## Features
//!
//! - **Single Writer**: every request runs on one serializer thread, so handler
//!   invocations are atomic without locks in the register store
//! - **Pluggable Functions**: any of the 256 function codes can be served by a
//!   custom handler, installed or replaced while running
//! - **Authorization Context**: TLS client identity and role (from a
//!   certificate extension) reach context-aware handlers
//! - **Fault Isolation**: a panicking handler becomes a Slave Device Failure
//!   exception and the server keeps running
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Default handler |
//! |------|----------|-----------------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! Every other code answers Illegal Function until a handler is registered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_server::{Exception, ModbusResult, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let server = Server::new(ServerConfig::default())?;
//!
//!     // Vendor function: only operators may reset the counters
//!     server.register_context_function(0x41, |ctx, _frame| {
//!         match ctx.role() {
//!             Some("operator") => Err(Exception::Success),
//!             _ => Err(Exception::IllegalFunction),
//!         }
//!     });
//!
//!     server.listen_tcp("0.0.0.0:502").await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.close();
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Protocol exception codes
pub mod exception;

/// PDU payload parsing and building
pub mod pdu;

/// TCP and RTU frame codec
pub mod frame;

/// Register memory
pub mod registers;

/// Server configuration and request limits
pub mod config;

/// Per-request context
pub mod context;

// ============================================================================
// Server modules
// ============================================================================

/// Function code dispatch table
pub mod dispatch;

/// Default function handlers
pub mod handlers;

/// Single-writer request serializer
pub mod serializer;

/// TCP, TLS and RTU transports
pub mod transport;

/// Server facade
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Core server API ===
pub use server::Server;
pub use config::{RequestLimits, ServerConfig};
pub use context::{RequestContext, TransportKind};
pub use dispatch::{DispatchTable, HandlerResult, ServerState};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};
pub use exception::Exception;

// === Core types ===
pub use frame::{Envelope, Frame};
pub use registers::{Bank, RegisterBank};
pub use serializer::SerializerHandle;

// === PDU (handler authors) ===
pub use pdu::{PduBuilder, PduReader};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

#[cfg(feature = "tls")]
pub use transport::tls::{PeerIdentity, TlsIdentity};

#[cfg(feature = "rtu")]
pub use transport::rtu::RtuConfig;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage Modbus Server v{} - Industrial Modbus slave by Evan Liu",
        VERSION
    )
}
