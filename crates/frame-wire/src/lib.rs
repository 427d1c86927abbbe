//! Wire framing for the preview stream.
//!
//! Each frame travels as a 4-byte unsigned big-endian length `L` followed by
//! exactly `L` bytes of JPEG. There is no handshake, version, or trailer.

use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;

pub const HEADER_LEN: usize = 4;

/// Largest payload either side will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("refusing to frame an empty payload")]
    Empty,
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_LEN} byte frame limit")]
    TooLarge(usize),
    #[error("peer announced an invalid frame length {0}")]
    BadLength(u32),
    #[error("stream ended after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Encode the length header for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], WireError> {
    if len == 0 {
        return Err(WireError::Empty);
    }
    if len > MAX_FRAME_LEN {
        return Err(WireError::TooLarge(len));
    }
    Ok((len as u32).to_be_bytes())
}

/// Write one frame message. Header and payload go out in a single buffer so a
/// partial write never leaves a lone header on the wire when the caller drops
/// the connection afterwards.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<usize, WireError> {
    let header = encode_header(payload.len())?;
    let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
    message.extend_from_slice(&header);
    message.extend_from_slice(payload);
    writer.write_all(&message)?;
    writer.flush()?;
    Ok(message.len())
}

/// Read one frame message. `Ok(None)` means the peer closed cleanly between
/// messages; a close inside a message is `Truncated`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError> {
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(WireError::Truncated {
            read: got,
            expected: HEADER_LEN,
        });
    }
    let announced = u32::from_be_bytes(header);
    let len = announced as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(WireError::BadLength(announced));
    }
    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload)?;
    if got < len {
        return Err(WireError::Truncated {
            read: got,
            expected: len,
        });
    }
    Ok(Some(payload))
}

/// Fill `buf` until it is full or the reader hits EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
