//! Reliable full-buffer transfer over blocking byte streams.
//!
//! A stream may hand back fewer bytes than requested on any call. These
//! helpers loop until the whole buffer has moved or the stream gives up,
//! and report which of the two happened. There is no partial success: the
//! caller either gets the full buffer or an error.

use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

/// Why a read stopped before the buffer was full.
#[derive(Debug, Error)]
pub enum ReadCause {
    /// A read returned zero bytes: the peer closed its side.
    #[error("end of stream")]
    Eof,
    /// A read returned an error.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ReadCause {
    /// Whether the stream ended cleanly rather than failing.
    pub fn is_eof(&self) -> bool {
        matches!(self, ReadCause::Eof)
    }
}

/// Why a write stopped before the buffer was flushed.
#[derive(Debug, Error)]
pub enum WriteCause {
    /// A write accepted zero bytes.
    #[error("stream accepted no bytes")]
    Stalled,
    /// A write returned an error.
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Every byte was accepted but flushing them out failed.
    #[error("flush failed: {0}")]
    Flush(io::Error),
}

/// Failure of an all-or-nothing transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("short read: got {received} of {expected} bytes ({cause})")]
    ShortRead {
        expected: usize,
        received: usize,
        cause: ReadCause,
    },

    #[error("short write: wrote {written} of {expected} bytes ({cause})")]
    ShortWrite {
        expected: usize,
        written: usize,
        cause: WriteCause,
    },
}

impl TransferError {
    /// Bytes moved before the transfer failed.
    #[cfg(test)]
    pub fn transferred(&self) -> usize {
        match self {
            TransferError::ShortRead { received, .. } => *received,
            TransferError::ShortWrite { written, .. } => *written,
        }
    }
}

/// Fill `buf` completely from `stream`.
///
/// Partial reads are appended at the running offset. A read of zero bytes
/// or an error ends the transfer, with one exception: `Interrupted` is
/// re-issued, as `Read::read_exact` does. It means a signal arrived before
/// any byte moved, so nothing is lost by asking again.
pub fn read_full<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> Result<(), TransferError> {
    let expected = buf.len();
    let mut received = 0;

    while received < expected {
        match stream.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(TransferError::ShortRead {
                    expected,
                    received,
                    cause: ReadCause::Eof,
                })
            }
            Ok(n) => {
                debug_assert!(n <= expected - received);
                received += n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::ShortRead {
                    expected,
                    received,
                    cause: ReadCause::Io(e),
                })
            }
        }
    }

    Ok(())
}

/// Write all of `buf` to `stream`.
///
/// A write that accepts zero bytes or errors ends the transfer, except
/// `Interrupted`, which is re-issued as in `Write::write_all`.
pub fn write_all<W: Write + ?Sized>(stream: &mut W, buf: &[u8]) -> Result<(), TransferError> {
    let expected = buf.len();
    let mut written = 0;

    while written < expected {
        match stream.write(&buf[written..]) {
            Ok(0) => {
                return Err(TransferError::ShortWrite {
                    expected,
                    written,
                    cause: WriteCause::Stalled,
                })
            }
            Ok(n) => {
                debug_assert!(n <= expected - written);
                written += n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransferError::ShortWrite {
                    expected,
                    written,
                    cause: WriteCause::Io(e),
                })
            }
        }
    }

    Ok(())
}
