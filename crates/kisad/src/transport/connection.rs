//! Buffered, non-blocking byte transport for one session.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use kisa_protocol::{FrameDecoder, encode_frame};

use crate::session::SessionFault;

const READ_CHUNK: usize = 64 * 1024;

/// Size limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest frame accepted from or sent to the peer.
    pub max_frame: usize,
    /// Ceiling on bytes queued for a peer that is not reading.
    pub max_outbound: usize,
}

impl ConnectionLimits {
    /// Limits taken from the resolved configuration.
    #[must_use]
    pub fn from_config(config: &kisa_config::Config) -> Self {
        Self {
            max_frame: config.max_frame_bytes,
            max_outbound: config.max_outbound_bytes,
        }
    }
}

/// A non-blocking socket with an inbound frame decoder and an outbound queue.
///
/// Writes never block: whatever the kernel does not take immediately stays
/// queued until the socket reports it is writable again.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: UnixStream,
    decoder: FrameDecoder,
    outbound: VecDeque<u8>,
    limits: ConnectionLimits,
}

impl Connection {
    pub(crate) fn new(stream: UnixStream, limits: ConnectionLimits) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(limits.max_frame),
            outbound: VecDeque::new(),
            limits,
        })
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Performs one read and returns every frame completed by it.
    pub(crate) fn read_frames(&mut self) -> Result<Vec<Vec<u8>>, SessionFault> {
        let mut chunk = vec![0_u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => return Err(SessionFault::Disconnected),
            Ok(read) => {
                chunk.truncate(read);
                self.decoder.extend(&chunk);
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(error) if error.kind() == io::ErrorKind::ConnectionReset => {
                return Err(SessionFault::Disconnected);
            }
            Err(error) => return Err(SessionFault::Io(error)),
        }

        let mut frames = Vec::new();
        while let Some(frame) = self.decoder.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Frames `payload`, queues it, and attempts a non-blocking flush.
    pub(crate) fn send(&mut self, payload: &[u8]) -> Result<(), SessionFault> {
        let frame = encode_frame(payload, self.limits.max_frame)?;
        let queued = self.outbound.len() + frame.len();
        if queued > self.limits.max_outbound {
            return Err(SessionFault::OutboundOverflow {
                queued,
                max: self.limits.max_outbound,
            });
        }
        self.outbound.extend(frame);
        self.flush()
    }

    /// Writes queued bytes until the socket would block.
    pub(crate) fn flush(&mut self) -> Result<(), SessionFault> {
        while !self.outbound.is_empty() {
            let (front, _) = self.outbound.as_slices();
            match self.stream.write(front) {
                Ok(0) => return Err(SessionFault::Disconnected),
                Ok(written) => {
                    self.outbound.drain(..written);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    return Err(SessionFault::Disconnected);
                }
                Err(error) => return Err(SessionFault::Io(error)),
            }
        }
        Ok(())
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Largest payload [`Connection::send`] accepts.
    pub(crate) const fn max_payload(&self) -> usize {
        self.limits.max_frame
    }

    #[cfg(test)]
    pub(crate) fn queued_bytes(&self) -> usize {
        self.outbound.len()
    }
}
