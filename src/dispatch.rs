//! Function dispatch table
//!
//! Maps a function code to the handler that serves it. Two kinds of handler
//! exist:
//!
//! | Kind | Receives | Typical use |
//! |------|----------|-------------|
//! | Native | `&mut ServerState`, `&Frame` | register memory access |
//! | Context-aware | `&RequestContext`, `&Frame` | extensions needing peer identity or role |
//!
//! The table belongs to one server instance. When both kinds are registered
//! for the same code, the native handler is used.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::RequestLimits;
use crate::constants::*;
use crate::context::RequestContext;
use crate::exception::Exception;
use crate::frame::Frame;
use crate::handlers;
use crate::registers::RegisterBank;

/// Response payload or protocol exception produced by a handler.
///
/// `Err(Exception::Success)` is read as success with an empty payload.
pub type HandlerResult = Result<Vec<u8>, Exception>;

/// Native handler signature.
pub type NativeFn = dyn Fn(&mut ServerState, &Frame) -> HandlerResult + Send + Sync;

/// Context-aware handler signature.
pub type ContextFn = dyn Fn(&RequestContext, &Frame) -> HandlerResult + Send + Sync;

/// State owned by the request serializer and lent to native handlers.
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Register memory.
    pub registers: RegisterBank,
    /// Quantity limits for the default handlers.
    pub limits: RequestLimits,
}

impl ServerState {
    /// State with the given memory and limits.
    pub fn new(registers: RegisterBank, limits: RequestLimits) -> Self {
        Self { registers, limits }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(RegisterBank::new(), RequestLimits::default())
    }
}

/// A registered handler.
#[derive(Clone)]
pub enum FunctionHandler {
    /// Works on server state.
    Native(Arc<NativeFn>),
    /// Works on the request context.
    Context(Arc<ContextFn>),
}

impl FunctionHandler {
    /// Run the handler.
    pub fn call(&self, state: &mut ServerState, ctx: &RequestContext, frame: &Frame) -> HandlerResult {
        match self {
            FunctionHandler::Native(handler) => handler(state, frame),
            FunctionHandler::Context(handler) => handler(ctx, frame),
        }
    }
}

impl fmt::Debug for FunctionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionHandler::Native(_) => f.write_str("FunctionHandler::Native"),
            FunctionHandler::Context(_) => f.write_str("FunctionHandler::Context"),
        }
    }
}

/// Function code to handler mapping.
#[derive(Clone, Default)]
pub struct DispatchTable {
    native: HashMap<u8, Arc<NativeFn>>,
    context: HashMap<u8, Arc<ContextFn>>,
}

impl DispatchTable {
    /// Empty table: every function code is illegal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table serving FC 1, 2, 3, 4, 5, 6, 15 and 16 from the register bank.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register_native(FC_READ_COILS, handlers::read_coils);
        table.register_native(FC_READ_DISCRETE_INPUTS, handlers::read_discrete_inputs);
        table.register_native(FC_READ_HOLDING_REGISTERS, handlers::read_holding_registers);
        table.register_native(FC_READ_INPUT_REGISTERS, handlers::read_input_registers);
        table.register_native(FC_WRITE_SINGLE_COIL, handlers::write_single_coil);
        table.register_native(FC_WRITE_SINGLE_REGISTER, handlers::write_single_register);
        table.register_native(FC_WRITE_MULTIPLE_COILS, handlers::write_multiple_coils);
        table.register_native(FC_WRITE_MULTIPLE_REGISTERS, handlers::write_multiple_registers);
        table
    }

    /// Register a native handler, replacing any previous native handler for
    /// `code`.
    pub fn register_native<F>(&mut self, code: u8, handler: F)
    where
        F: Fn(&mut ServerState, &Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.native.insert(code, Arc::new(handler));
    }

    /// Register a context-aware handler, replacing any previous context-aware
    /// handler for `code`.
    pub fn register_context<F>(&mut self, code: u8, handler: F)
    where
        F: Fn(&RequestContext, &Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.context.insert(code, Arc::new(handler));
    }

    /// Remove both handlers for `code`.
    pub fn unregister(&mut self, code: u8) {
        self.native.remove(&code);
        self.context.remove(&code);
    }

    /// Handler for `code`, native first.
    pub fn lookup(&self, code: u8) -> Option<FunctionHandler> {
        if let Some(handler) = self.native.get(&code) {
            return Some(FunctionHandler::Native(Arc::clone(handler)));
        }
        self.context
            .get(&code)
            .map(|handler| FunctionHandler::Context(Arc::clone(handler)))
    }

    /// Function codes with at least one handler, ascending.
    pub fn codes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = self.native.keys().chain(self.context.keys()).copied().collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("codes", &self.codes())
            .finish()
    }
}
