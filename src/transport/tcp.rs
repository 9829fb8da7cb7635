//! Modbus/TCP listener and MBAP framing

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::constants::{MBAP_HEADER_LEN, MAX_MBAP_LENGTH, MIN_MBAP_LENGTH};
use crate::context::{Session, TransportKind};
use crate::error::{ModbusError, ModbusResult};
use crate::serializer::SerializerHandle;
use crate::transport::{serve_connection, Framing};

/// Pause after a failed accept before trying again.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Read one MBAP frame.
///
/// Returns `Ok(None)` on a clean end-of-stream before the first header byte.
/// A length field outside 2..=254 is rejected before the body is read.
pub(crate) async fn read_frame<R>(reader: &mut R) -> ModbusResult<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MBAP_HEADER_LEN];
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;

    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(ModbusError::malformed(format!(
            "MBAP length {} outside {}..={}",
            length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
        )));
    }

    // length counts the unit id, which is already in the header
    let mut raw = BytesMut::with_capacity(6 + length);
    raw.extend_from_slice(&header);
    raw.resize(6 + length, 0);
    reader.read_exact(&mut raw[MBAP_HEADER_LEN..]).await?;
    Ok(Some(raw))
}

/// Accept connections until the task is aborted.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    serializer: SerializerHandle,
    config: Arc<ServerConfig>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted Modbus/TCP connection from {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Unable to set TCP_NODELAY for {}: {}", peer, e);
                }
                let session = Session::new(TransportKind::Tcp, Some(peer));
                tokio::spawn(serve_connection(
                    stream,
                    session,
                    Framing::Tcp,
                    serializer.clone(),
                    Arc::clone(&config),
                ));
            }
            Err(e) => {
                warn!("Unable to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
