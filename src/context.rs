//! Per-request context
//!
//! Every decoded frame is submitted together with a [`RequestContext`]. It
//! carries the attributes a handler may base authorization decisions on
//! (peer address, verified identity, role) and the cancellation and deadline
//! inherited from the connection the frame arrived on.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain Modbus/TCP.
    Tcp,
    /// Modbus/TCP over mutually-authenticated TLS.
    Tls,
    /// Serial RTU.
    Rtu,
}

/// Cancellation flag shared by a connection and all of its requests.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Attributes fixed for the lifetime of a connection.
#[derive(Debug, Clone)]
pub struct Session {
    transport: TransportKind,
    peer_addr: Option<SocketAddr>,
    identity: Option<String>,
    role: Option<String>,
    cancel: CancelToken,
}

impl Session {
    /// Session for a connection without authenticated peer.
    pub fn new(transport: TransportKind, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            transport,
            peer_addr,
            identity: None,
            role: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attach the verified identity and role of the peer.
    pub fn with_peer_identity(mut self, identity: Option<String>, role: Option<String>) -> Self {
        self.identity = identity;
        self.role = role;
        self
    }

    /// Token cancelled when the connection ends.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Short label for log lines.
    pub fn describe(&self) -> String {
        match (self.peer_addr, &self.identity) {
            (Some(addr), Some(identity)) => format!("{:?} {} ({})", self.transport, addr, identity),
            (Some(addr), None) => format!("{:?} {}", self.transport, addr),
            (None, _) => format!("{:?} link", self.transport),
        }
    }

    /// Derive the context for one request.
    pub fn request_context(&self, deadline: Option<Instant>) -> RequestContext {
        RequestContext {
            transport: self.transport,
            peer_addr: self.peer_addr,
            identity: self.identity.clone(),
            role: self.role.clone(),
            deadline,
            cancel: self.cancel.clone(),
        }
    }
}

/// Context handed to context-aware function handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    transport: TransportKind,
    peer_addr: Option<SocketAddr>,
    identity: Option<String>,
    role: Option<String>,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl RequestContext {
    /// Context with no peer attributes, no deadline and a fresh token.
    pub fn detached(transport: TransportKind) -> Self {
        Session::new(transport, None).request_context(None)
    }

    /// Transport the request arrived on.
    #[inline]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Remote socket address; `None` on serial links.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Remote host without the port.
    #[inline]
    pub fn peer_host(&self) -> Option<IpAddr> {
        self.peer_addr.map(|addr| addr.ip())
    }

    /// Common name of the verified client certificate (TLS only).
    #[inline]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Role from the client certificate's role extension (TLS only).
    #[inline]
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Instant after which the request is no longer worth answering.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True if the connection is gone.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True if the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_propagates_identity() {
        let peer: SocketAddr = "10.0.0.7:40122".parse().unwrap();
        let session = Session::new(TransportKind::Tls, Some(peer))
            .with_peer_identity(Some("plc-7".into()), Some("operator".into()));

        let ctx = session.request_context(None);
        assert_eq!(ctx.transport(), TransportKind::Tls);
        assert_eq!(ctx.peer_host(), Some("10.0.0.7".parse().unwrap()));
        assert_eq!(ctx.identity(), Some("plc-7"));
        assert_eq!(ctx.role(), Some("operator"));
        assert_eq!(session.describe(), "Tls 10.0.0.7:40122 (plc-7)");
        assert_eq!(Session::new(TransportKind::Rtu, None).describe(), "Rtu link");
    }

    #[test]
    fn test_cancellation_is_shared() {
        let session = Session::new(TransportKind::Tcp, None);
        let first = session.request_context(None);
        let second = session.request_context(None);
        assert!(!first.is_cancelled());

        session.cancel_token().cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let ctx = RequestContext::detached(TransportKind::Rtu);
        assert!(!ctx.is_expired());
        assert_eq!(ctx.peer_addr(), None);
        assert_eq!(ctx.role(), None);

        let session = Session::new(TransportKind::Tcp, None);
        let past = session.request_context(Some(Instant::now() - Duration::from_millis(1)));
        assert!(past.is_expired());
        let future = session.request_context(Some(Instant::now() + Duration::from_secs(60)));
        assert!(!future.is_expired());
    }
}
