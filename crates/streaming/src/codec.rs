//! Wire framing.
//!
//! A frame is a 4-byte big-endian payload length followed by the bincode payload. Commands
//! travel as `CommandFrame`s; registry snapshots use the same framing for bulk state transfer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use membership::{Command, RegistrySnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamingError};

/// Length of the frame header.
pub const HEADER_LEN: usize = 4;

/// A command stamped with its position in the total order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub sequence: u64,
    pub command: Command,
}

pub fn encode_command(frame: &CommandFrame) -> Result<Bytes> {
    encode(frame)
}

pub fn decode_command(bytes: Bytes) -> Result<CommandFrame> {
    decode(bytes)
}

pub fn encode_snapshot(snapshot: &RegistrySnapshot) -> Result<Bytes> {
    encode(snapshot)
}

pub fn decode_snapshot(bytes: Bytes) -> Result<RegistrySnapshot> {
    decode(bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let payload = bincode::serialize(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        StreamingError::Frame(format!("payload of {} bytes does not fit a frame", payload.len()))
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

fn decode<T: DeserializeOwned>(mut bytes: Bytes) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(StreamingError::Frame(format!("truncated header of {} bytes", bytes.len())));
    }
    let len = bytes.get_u32() as usize;
    if bytes.len() != len {
        return Err(StreamingError::Frame(format!(
            "header announces {} payload bytes, found {}",
            len,
            bytes.len()
        )));
    }
    Ok(bincode::deserialize(&bytes)?)
}
