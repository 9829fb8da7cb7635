//! Modbus/TCP over mutually-authenticated TLS
//!
//! Clients must present a certificate chaining to one of the configured
//! client roots. After the handshake the leaf certificate is inspected once
//! per connection:
//! - the subject common name becomes the request identity
//! - the role extension (OID `1.3.6.1.4.1.50316.802.1`) becomes the role
//!
//! Both are then attached to every request on that connection.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use x509_parser::parse_x509_certificate;

use crate::config::ServerConfig;
use crate::constants::ROLE_EXTENSION_OID;
use crate::context::{Session, TransportKind};
use crate::error::{ModbusError, ModbusResult};
use crate::serializer::SerializerHandle;
use crate::transport::tcp::ACCEPT_BACKOFF;
use crate::transport::{serve_connection, Framing};

/// DER tag of an ASN.1 UTF8String.
const UTF8_STRING_TAG: u8 = 0x0C;

/// Server certificate, key and the roots trusted for client certificates.
pub struct TlsIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Vec<CertificateDer<'static>>,
}

impl TlsIdentity {
    /// Identity from a DER server chain, its private key and the DER roots
    /// trusted for client certificates, all already in memory.
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        client_roots: Vec<CertificateDer<'static>>,
    ) -> Self {
        Self {
            cert_chain,
            key,
            client_roots,
        }
    }

    /// Load the server chain, its private key and the client CA bundle from
    /// PEM files.
    pub fn from_pem_files(
        cert_chain: impl AsRef<Path>,
        key: impl AsRef<Path>,
        client_roots: impl AsRef<Path>,
    ) -> ModbusResult<Self> {
        let chain = load_certs(cert_chain.as_ref())?;
        let roots = load_certs(client_roots.as_ref())?;
        let key = PrivateKeyDer::from_pem_file(key.as_ref()).map_err(|e| {
            ModbusError::certificate(format!("{}: {}", key.as_ref().display(), e))
        })?;
        Ok(Self::new(chain, key, roots))
    }

    /// Build an acceptor that requires and verifies client certificates.
    pub fn acceptor(&self) -> ModbusResult<TlsAcceptor> {
        if self.cert_chain.is_empty() {
            return Err(ModbusError::certificate("empty server certificate chain"));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        for root in &self.client_roots {
            roots.add(root.clone())?;
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .map_err(|e| ModbusError::tls(format!("client verifier: {}", e)))?;

        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

impl Clone for TlsIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
            client_roots: self.client_roots.clone(),
        }
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("cert_chain", &self.cert_chain.len())
            .field("client_roots", &self.client_roots.len())
            .finish_non_exhaustive()
    }
}

fn load_certs(path: &Path) -> ModbusResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ModbusError::certificate(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ModbusError::certificate(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

/// Attributes taken from a verified client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    pub common_name: Option<String>,
    pub role: Option<String>,
}

/// Extract the identity of the leaf certificate in `certs`.
///
/// Missing or unparsable certificates yield an empty identity; the chain has
/// already been verified by the time this runs.
pub fn peer_identity(certs: &[CertificateDer<'_>]) -> PeerIdentity {
    let Some(leaf) = certs.first() else {
        return PeerIdentity::default();
    };

    let cert = match parse_x509_certificate(leaf.as_ref()) {
        Ok((_, cert)) => cert,
        Err(e) => {
            warn!("Unable to parse client certificate: {}", e);
            return PeerIdentity::default();
        }
    };

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned);

    let role = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == ROLE_EXTENSION_OID)
        .and_then(|ext| decode_role(ext.value));

    PeerIdentity { common_name, role }
}

/// Decode the role extension value.
///
/// Accepts a DER UTF8String or, failing that, the raw bytes as UTF-8.
fn decode_role(value: &[u8]) -> Option<String> {
    let content = match value {
        [UTF8_STRING_TAG, len, rest @ ..] if *len < 0x80 && *len as usize == rest.len() => rest,
        [UTF8_STRING_TAG, 0x81, len, rest @ ..] if *len as usize == rest.len() => rest,
        _ => value,
    };
    if content.is_empty() {
        return None;
    }
    String::from_utf8(content.to_vec()).ok()
}

/// Accept TLS connections until the task is aborted.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    serializer: SerializerHandle,
    config: Arc<ServerConfig>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted TLS connection from {}", peer);
                tokio::spawn(handshake_and_serve(
                    acceptor.clone(),
                    stream,
                    peer,
                    serializer.clone(),
                    Arc::clone(&config),
                ));
            }
            Err(e) => {
                warn!("Unable to accept TLS connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handshake_and_serve(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    serializer: SerializerHandle,
    config: Arc<ServerConfig>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Unable to set TCP_NODELAY for {}: {}", peer, e);
    }

    let tls = match tokio::time::timeout(config.handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e))
            if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
            ) =>
        {
            debug!("TLS peer {} left during handshake: {}", peer, e);
            return;
        }
        Ok(Err(e)) => {
            warn!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!(
                "TLS handshake with {} timed out after {:?}",
                peer, config.handshake_timeout
            );
            return;
        }
    };

    let identity = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(peer_identity)
        .unwrap_or_default();

    info!(
        "TLS client {} authenticated as {:?} with role {:?}",
        peer, identity.common_name, identity.role
    );

    let session = Session::new(TransportKind::Tls, Some(peer))
        .with_peer_identity(identity.common_name, identity.role);
    serve_connection(tls, session, Framing::Tcp, serializer, config).await;
}
