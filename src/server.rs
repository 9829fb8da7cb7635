//! Modbus server
//!
//! [`Server`] ties the pieces together: it owns the dispatch table, starts
//! the request serializer over a fresh register bank and spawns one accept
//! task per listener. All listeners of one server share the same serializer,
//! so TCP, TLS and RTU clients see the same register memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use voltage_modbus_server::{Server, ServerConfig};
//!
//! # async fn run() -> voltage_modbus_server::ModbusResult<()> {
//! let server = Server::new(ServerConfig::default())?;
//! server
//!     .with_registers(|bank| bank.holding_registers.write(0, &[10, 20, 30, 40]))
//!     .await??;
//! let addr = server.listen_tcp("0.0.0.0:502").await?;
//! println!("serving on {}", addr);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServerConfig;
use crate::context::{RequestContext, Session, TransportKind};
use crate::dispatch::{DispatchTable, HandlerResult, ServerState};
use crate::error::ModbusResult;
use crate::frame::Frame;
use crate::registers::RegisterBank;
use crate::serializer::{Serializer, SerializerHandle};
use crate::transport::rtu::check_unit_address;
use crate::transport::{self, Framing};

#[cfg(feature = "tls")]
use crate::transport::tls::TlsIdentity;

#[cfg(feature = "rtu")]
use crate::transport::rtu::{open_port, RtuConfig};

/// Modbus slave serving one register bank over any number of transports.
pub struct Server {
    config: Arc<ServerConfig>,
    dispatch: Arc<RwLock<DispatchTable>>,
    serializer: SerializerHandle,
    listeners: Mutex<Vec<(SocketAddr, JoinHandle<()>)>>,
    ports: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Server with the default function handlers.
    pub fn new(config: ServerConfig) -> ModbusResult<Self> {
        Self::with_dispatch(config, DispatchTable::with_defaults())
    }

    /// Server using `dispatch` as its initial function table.
    pub fn with_dispatch(config: ServerConfig, dispatch: DispatchTable) -> ModbusResult<Self> {
        config.validate()?;

        let state = ServerState::new(RegisterBank::with_size(config.bank_size), config.limits);
        let dispatch = Arc::new(RwLock::new(dispatch));
        let serializer =
            Serializer::new(state, Arc::clone(&dispatch), config.handler_budget).spawn()?;

        Ok(Self {
            config: Arc::new(config),
            dispatch,
            serializer,
            listeners: Mutex::new(Vec::new()),
            ports: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a native handler for `code`, replacing any previous one.
    ///
    /// Takes effect for the next request dispatched with that code.
    pub fn register_function<F>(&self, code: u8, handler: F)
    where
        F: Fn(&mut ServerState, &Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatch_mut().register_native(code, handler);
    }

    /// Register a context-aware handler for `code`.
    ///
    /// A native handler registered for the same code still wins.
    pub fn register_context_function<F>(&self, code: u8, handler: F)
    where
        F: Fn(&RequestContext, &Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatch_mut().register_context(code, handler);
    }

    /// Remove every handler for `code`.
    pub fn unregister_function(&self, code: u8) {
        self.dispatch_mut().unregister(code);
    }

    /// Function codes currently served.
    pub fn function_codes(&self) -> Vec<u8> {
        self.dispatch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .codes()
    }

    fn dispatch_mut(&self) -> std::sync::RwLockWriteGuard<'_, DispatchTable> {
        self.dispatch.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the register bank, serialized with all requests.
    pub async fn with_registers<F, R>(&self, f: F) -> ModbusResult<R>
    where
        F: FnOnce(&mut RegisterBank) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.serializer
            .with_state(move |state| f(&mut state.registers))
            .await
    }

    /// Submission handle, for transports driven outside this server.
    pub fn handle(&self) -> SerializerHandle {
        self.serializer.clone()
    }

    /// Start accepting Modbus/TCP connections on `addr`.
    ///
    /// Returns the bound address, which tells the real port when binding to
    /// port 0.
    pub async fn listen_tcp(&self, addr: impl ToSocketAddrs) -> ModbusResult<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Modbus/TCP listening on {}", local);

        let task = tokio::spawn(transport::tcp::accept_loop(
            listener,
            self.serializer.clone(),
            Arc::clone(&self.config),
        ));
        self.track_listener(local, task);
        Ok(local)
    }

    /// Start accepting mutually-authenticated TLS connections on `addr`.
    #[cfg(feature = "tls")]
    pub async fn listen_tls(
        &self,
        addr: impl ToSocketAddrs,
        identity: &TlsIdentity,
    ) -> ModbusResult<SocketAddr> {
        let acceptor = identity.acceptor()?;
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Modbus/TLS listening on {}", local);

        let task = tokio::spawn(transport::tls::accept_loop(
            listener,
            acceptor,
            self.serializer.clone(),
            Arc::clone(&self.config),
        ));
        self.track_listener(local, task);
        Ok(local)
    }

    /// Open a serial port and serve RTU requests on it.
    ///
    /// With [`RtuConfig::unit_id`] set, only that slave address and broadcasts
    /// are served. Must be called from within a Tokio runtime.
    #[cfg(feature = "rtu")]
    pub fn listen_rtu(&self, config: &RtuConfig) -> ModbusResult<()> {
        let port = open_port(config)?;
        self.spawn_rtu(port, config.unit_id);
        Ok(())
    }

    /// Serve RTU requests on an already-open byte stream, answering every
    /// unit id except broadcast.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn serve_rtu<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.spawn_rtu(stream, None);
    }

    /// Serve RTU requests addressed to `unit_id` on a shared line. Frames for
    /// other units are read and discarded.
    pub fn serve_rtu_as<S>(&self, stream: S, unit_id: u8) -> ModbusResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        check_unit_address(unit_id)?;
        self.spawn_rtu(stream, Some(unit_id));
        Ok(())
    }

    fn spawn_rtu<S>(&self, stream: S, unit_id: Option<u8>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let task = tokio::spawn(transport::serve_connection(
            stream,
            Session::new(TransportKind::Rtu, None),
            Framing::Rtu { unit_id },
            self.serializer.clone(),
            Arc::clone(&self.config),
        ));
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn track_listener(&self, local: SocketAddr, task: JoinHandle<()>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((local, task));
    }

    /// Addresses of the listeners that are still open.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Stop all listeners and serial ports.
    ///
    /// Connections that were already accepted are served until their peers
    /// disconnect.
    pub fn close(&self) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (addr, task) in listeners {
            task.abort();
            info!("Listener on {} closed", addr);
        }

        let ports: Vec<_> = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in ports {
            task.abort();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::Exception;

    #[tokio::test]
    async fn test_with_registers_and_handler_registration() {
        let server = Server::new(ServerConfig::default().with_bank_size(16)).unwrap();
        assert_eq!(server.function_codes(), vec![1, 2, 3, 4, 5, 6, 15, 16]);

        let len = server
            .with_registers(|bank| bank.holding_registers.len())
            .await
            .unwrap();
        assert_eq!(len, 16);

        server.register_function(0x41, |state, _| {
            let value = state.registers.holding_registers.get(0)?;
            Ok(value.to_be_bytes().to_vec())
        });
        server
            .with_registers(|bank| bank.holding_registers.set(0, 0xBEEF))
            .await
            .unwrap()
            .unwrap();

        let ctx = RequestContext::detached(TransportKind::Tcp);
        let response = server
            .handle()
            .submit(ctx.clone(), Frame::tcp(7, 1, 0x41, Vec::new()))
            .await
            .unwrap();
        assert_eq!(response.payload(), &[0xBE, 0xEF]);

        server.unregister_function(0x41);
        let response = server
            .handle()
            .submit(ctx, Frame::tcp(8, 1, 0x41, Vec::new()))
            .await
            .unwrap();
        assert_eq!(response.exception(), Some(Exception::IllegalFunction));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        assert!(Server::new(ServerConfig::default().with_bank_size(0)).is_err());
    }

    #[tokio::test]
    async fn test_close_stops_listeners() {
        let server = Server::new(ServerConfig::default()).unwrap();
        let addr = server.listen_tcp("127.0.0.1:0").await.unwrap();
        assert_eq!(server.local_addrs(), vec![addr]);

        server.close();
        assert!(server.local_addrs().is_empty());
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
