//! Length-prefixed framing for byte-stream transports.
//!
//! Stream sockets do not preserve record boundaries, so every message travels
//! in a frame: a 4-byte big-endian payload length followed by the payload.

use std::io::{self, Read, Write};

use crate::error::FrameError;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8], max_frame: usize) -> Result<Vec<u8>, FrameError> {
    let length = checked_length(payload.len(), max_frame)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn checked_length(size: usize, max_frame: usize) -> Result<u32, FrameError> {
    if size > max_frame {
        return Err(FrameError::TooLarge {
            size,
            max: max_frame,
        });
    }
    u32::try_from(size).map_err(|_| FrameError::TooLarge {
        size,
        max: max_frame,
    })
}

/// Incremental splitter for bytes arriving from a non-blocking stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl FrameDecoder {
    /// Builds a decoder rejecting frames above `max_frame` bytes.
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[cfg(test)]
    const fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete frame payload, if one is buffered.
    ///
    /// An oversized length prefix is reported as soon as the header arrives;
    /// the stream cannot be resynchronised afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header) = self.buffer.first_chunk::<FRAME_HEADER_LEN>() else {
            return Ok(None);
        };
        let size = usize::try_from(u32::from_be_bytes(*header)).unwrap_or(usize::MAX);
        if size > self.max_frame {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame,
            });
        }
        let total = FRAME_HEADER_LEN + size;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let payload = self
            .buffer
            .drain(..total)
            .skip(FRAME_HEADER_LEN)
            .collect();
        Ok(Some(payload))
    }
}

/// Writes one frame to a blocking writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8], max_frame: usize) -> io::Result<()> {
    let frame = encode_frame(payload, max_frame)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads one frame from a blocking reader.
///
/// Returns `Ok(None)` on a clean end of stream before any header byte.
pub fn read_frame<R: Read>(reader: &mut R, max_frame: usize) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0_u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let Some(remaining) = header.get_mut(filled..) else {
            break;
        };
        match reader.read(remaining) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ));
            }
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    let size = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
    if size > max_frame {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            FrameError::TooLarge {
                size,
                max: max_frame,
            },
        ));
    }
    let mut payload = vec![0_u8; size];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
