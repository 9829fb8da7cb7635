//! Serial RTU framing and port setup
//!
//! RTU has no length header. The request length follows from the function
//! code for the standard functions; for any other code the frame ends when
//! the line has been silent for the configured inter-frame gap.
//!
//! A port may be bound to one slave address. Frames for other units on the
//! same line are still read, so framing stays in step, but never answered.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

#[cfg(feature = "rtu")]
pub use serial::{open_port, RtuConfig};

/// How many bytes follow the unit id and function code of a request.
enum RequestBody {
    /// Fixed number of bytes, CRC included.
    Fixed(usize),
    /// Address, quantity and byte count, then that many data bytes and the CRC.
    ByteCount,
    /// Unknown layout: read until the line goes quiet.
    UntilSilence,
}

fn request_body(function: u8) -> RequestBody {
    match function {
        FC_READ_COILS
        | FC_READ_DISCRETE_INPUTS
        | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS
        | FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER => RequestBody::Fixed(4 + RTU_CRC_LEN),
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => RequestBody::ByteCount,
        _ => RequestBody::UntilSilence,
    }
}

/// Reject addresses a slave cannot be configured with.
pub fn check_unit_address(unit_id: u8) -> ModbusResult<()> {
    if !(1..=MAX_RTU_UNIT).contains(&unit_id) {
        return Err(ModbusError::config(format!(
            "RTU slave address {} outside 1..={}",
            unit_id, MAX_RTU_UNIT
        )));
    }
    Ok(())
}

/// True if a frame for `unit_id` must be executed by a slave bound to
/// `address`. Broadcasts are executed by every slave; `None` accepts all.
pub(crate) fn is_addressed_to(unit_id: u8, address: Option<u8>) -> bool {
    match address {
        Some(own) => unit_id == own || unit_id == RTU_BROADCAST_UNIT,
        None => true,
    }
}

/// Read one RTU request frame.
///
/// Returns `Ok(None)` on end-of-stream before the first byte.
pub(crate) async fn read_frame<R>(reader: &mut R, gap: Duration) -> ModbusResult<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    let n = reader.read(&mut head).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut head[n..]).await?;

    let mut raw = BytesMut::with_capacity(MAX_RTU_FRAME_LEN);
    raw.extend_from_slice(&head);

    match request_body(head[1]) {
        RequestBody::Fixed(len) => read_more(reader, &mut raw, len).await?,
        RequestBody::ByteCount => {
            read_more(reader, &mut raw, 5).await?;
            let byte_count = raw[6] as usize;
            read_more(reader, &mut raw, byte_count + RTU_CRC_LEN).await?;
        }
        RequestBody::UntilSilence => read_until_silence(reader, &mut raw, gap).await?,
    }
    Ok(Some(raw))
}

async fn read_more<R>(reader: &mut R, raw: &mut BytesMut, len: usize) -> ModbusResult<()>
where
    R: AsyncRead + Unpin,
{
    let start = raw.len();
    raw.resize(start + len, 0);
    reader.read_exact(&mut raw[start..]).await?;
    Ok(())
}

async fn read_until_silence<R>(reader: &mut R, raw: &mut BytesMut, gap: Duration) -> ModbusResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    while raw.len() < MAX_RTU_FRAME_LEN {
        match tokio::time::timeout(gap, reader.read(&mut buf)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let room = MAX_RTU_FRAME_LEN - raw.len();
                raw.extend_from_slice(&buf[..n.min(room)]);
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(feature = "rtu")]
mod serial {
    use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
    use tracing::info;

    use super::check_unit_address;
    use crate::error::{ModbusError, ModbusResult};

    /// Serial line settings. Defaults to 8 data bits, no parity, 1 stop bit
    /// and answering every unit id.
    #[derive(Debug, Clone)]
    pub struct RtuConfig {
        pub path: String,
        pub baud_rate: u32,
        pub data_bits: DataBits,
        pub parity: Parity,
        pub stop_bits: StopBits,
        /// Slave address on a shared line. `None` answers every unit but
        /// broadcast.
        pub unit_id: Option<u8>,
    }

    impl RtuConfig {
        /// 8N1 settings for `path` at `baud_rate`.
        pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                path: path.into(),
                baud_rate,
                data_bits: DataBits::Eight,
                parity: Parity::None,
                stop_bits: StopBits::One,
                unit_id: None,
            }
        }

        pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
            self.data_bits = data_bits;
            self
        }

        pub fn with_parity(mut self, parity: Parity) -> Self {
            self.parity = parity;
            self
        }

        pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
            self.stop_bits = stop_bits;
            self
        }

        /// Answer only requests for `unit_id` (1..=247) and broadcasts.
        pub fn with_unit_id(mut self, unit_id: u8) -> Self {
            self.unit_id = Some(unit_id);
            self
        }
    }

    /// Open the port described by `config`. Must be called inside a runtime.
    pub fn open_port(config: &RtuConfig) -> ModbusResult<SerialStream> {
        if config.baud_rate == 0 {
            return Err(ModbusError::config("baud rate must be positive"));
        }
        if let Some(unit_id) = config.unit_id {
            check_unit_address(unit_id)?;
        }
        let port = tokio_serial::new(&config.path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .open_native_async()?;
        info!(
            "Opened serial port {} at {} baud ({:?}, {:?}, {:?})",
            config.path, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );
        Ok(port)
    }
}
