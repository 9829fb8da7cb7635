//! Request serializer
//!
//! All requests from all connections are funnelled through one worker that
//! owns the [`ServerState`]. The worker takes jobs from an unbounded queue and
//! runs them strictly one at a time, so a handler invocation is atomic with
//! respect to the register banks without any lock inside the banks.
//!
//! Submitting a request waits until the worker has produced the response. A
//! connection therefore has at most one request in flight, which gives
//! per-connection ordering and throttles all connections uniformly when the
//! worker is busy. Reads are serialized exactly like writes; a store with
//! finer-grained locking would be needed to relax that.
//!
//! The worker is a dedicated OS thread, so a slow handler never stalls the
//! async runtime that drives the sockets.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::constants::MAX_PDU_SIZE;
use crate::context::RequestContext;
use crate::dispatch::{DispatchTable, ServerState};
use crate::error::{ModbusError, ModbusResult};
use crate::exception::Exception;
use crate::frame::Frame;
use crate::pdu::{function_code_description, log_request};

type StateAccess = Box<dyn FnOnce(&mut ServerState) + Send>;

enum Job {
    Request {
        ctx: RequestContext,
        frame: Frame,
        reply: oneshot::Sender<Frame>,
    },
    Access(StateAccess),
}

/// Cloneable submission side of the serializer.
#[derive(Clone, Debug)]
pub struct SerializerHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerializerHandle {
    /// Queue a request and wait for its response frame.
    ///
    /// Fails with [`ModbusError::ServerClosed`] if the worker is gone or
    /// dropped the request because its context was cancelled or expired.
    pub async fn submit(&self, ctx: RequestContext, frame: Frame) -> ModbusResult<Frame> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Job::Request { ctx, frame, reply })
            .map_err(|_| ModbusError::ServerClosed)?;
        response.await.map_err(|_| ModbusError::ServerClosed)
    }

    /// Run `f` on the worker, in queue order with the requests.
    ///
    /// This is the only safe way for code outside the handlers to read or
    /// modify register memory while the server is running.
    pub async fn with_state<F, R>(&self, f: F) -> ModbusResult<R>
    where
        F: FnOnce(&mut ServerState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: StateAccess = Box::new(move |state| {
            let _ = reply.send(f(state));
        });
        self.tx
            .send(Job::Access(job))
            .map_err(|_| ModbusError::ServerClosed)?;
        result.await.map_err(|_| ModbusError::ServerClosed)
    }

    /// True while the worker is accepting jobs.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Single-writer worker owning the server state.
pub struct Serializer {
    state: ServerState,
    dispatch: Arc<RwLock<DispatchTable>>,
    handler_budget: Duration,
}

impl Serializer {
    /// Create a worker over `state`, dispatching through `dispatch`.
    pub fn new(
        state: ServerState,
        dispatch: Arc<RwLock<DispatchTable>>,
        handler_budget: Duration,
    ) -> Self {
        Self {
            state,
            dispatch,
            handler_budget,
        }
    }

    /// Start the worker thread. It stops once every handle is dropped.
    pub fn spawn(self) -> ModbusResult<SerializerHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("modbus-serializer".to_string())
            .spawn(move || self.run(rx))?;
        Ok(SerializerHandle { tx })
    }

    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        debug!("Request serializer started");
        while let Some(job) = rx.blocking_recv() {
            match job {
                Job::Request { ctx, frame, reply } => {
                    if reply.is_closed() || ctx.is_cancelled() || ctx.is_expired() {
                        debug!(
                            "Dropping request FC={:02X}: requester gone or deadline passed",
                            frame.function()
                        );
                        continue;
                    }
                    let response = self.handle(&ctx, &frame);
                    let _ = reply.send(response);
                }
                Job::Access(access) => {
                    let state = &mut self.state;
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| access(state))) {
                        error!("State access panicked: {}", panic_message(&*payload));
                    }
                }
            }
        }
        debug!("Request serializer stopped");
    }

    /// Produce the response for one request.
    pub fn handle(&mut self, ctx: &RequestContext, request: &Frame) -> Frame {
        let function = request.function();
        log_request(request.unit_id(), function, request.payload());

        let mut response = request.response();
        let handler = self
            .dispatch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(function);

        let result = match handler {
            Some(handler) => {
                let started = Instant::now();
                let state = &mut self.state;
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| handler.call(state, ctx, request)));
                let elapsed = started.elapsed();
                if elapsed > self.handler_budget {
                    warn!(
                        "Handler for FC={:02X} ({}) took {:?}, budget {:?}",
                        function,
                        function_code_description(function),
                        elapsed,
                        self.handler_budget
                    );
                }
                outcome.unwrap_or_else(|payload| {
                    error!(
                        "Handler for FC={:02X} panicked: {}",
                        function,
                        panic_message(&*payload)
                    );
                    Err(Exception::SlaveDeviceFailure)
                })
            }
            None => Err(Exception::IllegalFunction),
        };

        match result {
            // function code byte plus payload must fit one PDU
            Ok(payload) if payload.len() > MAX_PDU_SIZE - 1 => {
                error!(
                    "Handler for FC={:02X} returned {} bytes, limit {}",
                    function,
                    payload.len(),
                    MAX_PDU_SIZE - 1
                );
                response.set_exception(Exception::SlaveDeviceFailure);
            }
            Ok(payload) => response.set_payload(payload),
            Err(exception) => {
                if !exception.is_success() {
                    debug!("Exception response FC={:02X}: {}", function, exception);
                }
                response.set_exception(exception);
            }
        }
        response
    }

    /// Server state, for inspection before the worker is spawned.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Mutable server state, for seeding before the worker is spawned.
    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
