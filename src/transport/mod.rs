//! Transport layer
//!
//! Every transport feeds the same per-connection pipeline:
//! read one frame → decode → attach context → submit to the serializer →
//! write the response → read the next frame.
//!
//! Only the framing differs:
//! - **TCP / TLS**: MBAP header announces the length of the rest
//! - **RTU**: length derived from the function code, or an inter-frame gap

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

use crate::config::ServerConfig;
use crate::constants::RTU_BROADCAST_UNIT;
use crate::context::{CancelToken, Session};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::Frame;
use crate::serializer::SerializerHandle;

pub mod rtu;
pub mod tcp;

#[cfg(feature = "tls")]
pub mod tls;

/// Wire framing used on a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// MBAP-framed Modbus/TCP (plain or TLS).
    Tcp,
    /// Serial line RTU with CRC, optionally bound to one slave address.
    Rtu { unit_id: Option<u8> },
}

/// Cancels the session token when the read loop ends, however it ends.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Serve one connection until the peer leaves or an error occurs.
///
/// Errors end this connection only. End-of-stream is not reported as an
/// error.
pub(crate) async fn serve_connection<S>(
    mut stream: S,
    session: Session,
    framing: Framing,
    serializer: SerializerHandle,
    config: Arc<ServerConfig>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _cancel = CancelOnDrop(session.cancel_token().clone());
    let peer = session.describe();

    loop {
        match serve_one(&mut stream, &session, framing, &serializer, &config).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Connection {} closed by peer", peer);
                break;
            }
            Err(e) if e.is_end_of_stream() => {
                debug!("Connection {} ended: {}", peer, e);
                break;
            }
            Err(e @ ModbusError::MalformedFrame { .. }) => {
                warn!("Bad packet from {}: {}", peer, e);
                break;
            }
            Err(e) => {
                error!("Connection {} failed: {}", peer, e);
                break;
            }
        }
    }
}

/// Handle a single request. `Ok(false)` means clean end-of-stream.
async fn serve_one<S>(
    stream: &mut S,
    session: &Session,
    framing: Framing,
    serializer: &SerializerHandle,
    config: &ServerConfig,
) -> ModbusResult<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (frame, answer) = match framing {
        Framing::Tcp => match tcp::read_frame(stream).await? {
            Some(raw) => (Frame::decode_tcp(&raw)?, true),
            None => return Ok(false),
        },
        Framing::Rtu { unit_id } => {
            let frame = match rtu::read_frame(stream, config.rtu_frame_gap).await? {
                Some(raw) => Frame::decode_rtu(&raw)?,
                None => return Ok(false),
            };
            if !rtu::is_addressed_to(frame.unit_id(), unit_id) {
                trace!("Skipping RTU frame for unit {}", frame.unit_id());
                return Ok(true);
            }
            let answer = frame.unit_id() != RTU_BROADCAST_UNIT;
            (frame, answer)
        }
    };

    let ctx = session.request_context(Some(Instant::now() + config.request_timeout));

    let response = tokio::time::timeout(config.request_timeout, serializer.submit(ctx, frame))
        .await
        .map_err(|_| ModbusError::timeout("request", config.request_timeout))??;

    if answer {
        stream.write_all(&response.encode()).await?;
        stream.flush().await?;
    }
    Ok(true)
}
