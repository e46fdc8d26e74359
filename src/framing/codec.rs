//! Frame encoding and decoding.
//!
//! A frame is a 4-byte little-endian length followed by that many payload
//! bytes. The length is checked against the codec's `max_payload` before
//! any payload byte is read, so a peer cannot make us allocate or consume
//! more than one maximum-size frame.

use bytes::BytesMut;
use std::io::{Read, Write};
use thiserror::Error;

use super::io::{read_full, write_all, ReadCause, TransferError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default maximum payload size in bytes.
pub const MAX_PAYLOAD: usize = 4096;

/// Framing failure. Every variant ends the session it occurred on.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended (or failed) before any byte of a new frame arrived.
    #[error("connection closed: {cause}")]
    ConnectionClosed { cause: ReadCause },

    /// The stream ended partway through a frame header.
    #[error("incomplete frame header: {0}")]
    ShortRead(TransferError),

    /// Declared length exceeds the configured maximum.
    #[error("frame too large: {declared} bytes exceeds limit of {max}")]
    FrameTooLarge { declared: u64, max: usize },

    /// The header arrived but the payload did not.
    #[error("truncated payload: {0}")]
    TruncatedPayload(TransferError),

    /// A frame could not be written out.
    #[error("write failure: {0}")]
    WriteFailure(TransferError),
}

impl FrameError {
    /// Whether this is the normal end of a session rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed { .. })
    }
}

/// Per-session scratch space: one header plus one maximum-size payload.
///
/// Allocated once when a session starts and reused for every frame on it.
#[derive(Debug)]
pub struct TransferBuffer {
    buf: BytesMut,
}

impl TransferBuffer {
    /// Allocate a buffer able to hold a frame of up to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(HEADER_LEN + max_payload),
        }
    }

    /// Total size, header included.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        header
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..HEADER_LEN]
    }

    pub fn payload(&self, len: usize) -> &[u8] {
        &self.buf[HEADER_LEN..HEADER_LEN + len]
    }

    /// Payload region of `len` bytes, growing the buffer if it was sized for
    /// a smaller limit.
    pub fn payload_mut(&mut self, len: usize) -> &mut [u8] {
        if self.buf.len() < HEADER_LEN + len {
            self.buf.resize(HEADER_LEN + len, 0);
        }
        &mut self.buf[HEADER_LEN..HEADER_LEN + len]
    }
}

/// Length-prefixed frame codec with a payload limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// A transfer buffer sized for this codec.
    pub fn buffer(&self) -> TransferBuffer {
        TransferBuffer::new(self.max_payload)
    }

    /// Decode a length prefix, rejecting lengths above the limit.
    pub fn parse_header(&self, header: [u8; HEADER_LEN]) -> Result<usize, FrameError> {
        let declared = u32::from_le_bytes(header);
        if declared as u64 > self.max_payload as u64 {
            return Err(FrameError::FrameTooLarge {
                declared: declared as u64,
                max: self.max_payload,
            });
        }
        Ok(declared as usize)
    }

    /// Encode a length prefix for a payload of `len` bytes.
    pub fn encode_header(&self, len: usize) -> Result<[u8; HEADER_LEN], FrameError> {
        if len > self.max_payload {
            return Err(FrameError::FrameTooLarge {
                declared: len as u64,
                max: self.max_payload,
            });
        }
        // max_payload is a usize but the prefix is 32 bits wide
        let len = u32::try_from(len).map_err(|_| FrameError::FrameTooLarge {
            declared: len as u64,
            max: u32::MAX as usize,
        })?;
        Ok(len.to_le_bytes())
    }

    /// Read one frame from `stream` into `buf`, returning the payload.
    ///
    /// A stream that ends before the first header byte yields
    /// `ConnectionClosed`; one that ends later yields `ShortRead` or
    /// `TruncatedPayload`.
    pub fn read_frame<'b, R: Read + ?Sized>(
        &self,
        stream: &mut R,
        buf: &'b mut TransferBuffer,
    ) -> Result<&'b [u8], FrameError> {
        read_full(stream, buf.header_mut()).map_err(|e| match e {
            TransferError::ShortRead {
                received: 0, cause, ..
            } => FrameError::ConnectionClosed { cause },
            other => FrameError::ShortRead(other),
        })?;

        let len = self.parse_header(buf.header())?;

        read_full(stream, buf.payload_mut(len)).map_err(FrameError::TruncatedPayload)?;

        Ok(buf.payload(len))
    }

    /// Write `payload` to `stream` as one frame.
    ///
    /// The header and payload go out as two writes; both must complete.
    /// Oversized payloads are rejected before anything is written.
    pub fn write_frame<W: Write + ?Sized>(
        &self,
        stream: &mut W,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        let header = self.encode_header(payload.len())?;

        write_all(stream, &header).map_err(FrameError::WriteFailure)?;
        write_all(stream, payload).map_err(FrameError::WriteFailure)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::testing::{frame, ChunkedReader, ChunkedWriter, FailingStream};
    use std::io::ErrorKind;

    fn round_trip(codec: &FrameCodec, payload: &[u8], chunk: usize) -> Vec<u8> {
        let mut writer = ChunkedWriter::new(chunk);
        codec.write_frame(&mut writer, payload).unwrap();

        let mut reader = ChunkedReader::new(writer.written().to_vec(), chunk);
        let mut buf = codec.buffer();
        codec.read_frame(&mut reader, &mut buf).unwrap().to_vec()
    }

    #[test]
    fn test_header_is_little_endian() {
        let codec = FrameCodec::default();
        assert_eq!(codec.encode_header(5).unwrap(), [5, 0, 0, 0]);
        assert_eq!(codec.encode_header(0x0102).unwrap(), [0x02, 0x01, 0, 0]);
        assert_eq!(codec.parse_header([0x00, 0x10, 0, 0]).unwrap(), 4096);
    }

    #[test]
    fn test_parse_header_rejects_oversized() {
        let codec = FrameCodec::default();

        match codec.parse_header(4097u32.to_le_bytes()) {
            Err(FrameError::FrameTooLarge {
                declared: 4097,
                max: 4096,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }

        // the full 32-bit range is still rejected, not wrapped
        assert!(codec.parse_header([0xff; 4]).is_err());
    }

    #[test]
    fn test_round_trip_boundaries() {
        let codec = FrameCodec::default();
        let max: Vec<u8> = (0..MAX_PAYLOAD).map(|i| (i % 251) as u8).collect();

        assert_eq!(round_trip(&codec, b"", 64), b"");
        assert_eq!(round_trip(&codec, b"hello", 1), b"hello");
        assert_eq!(round_trip(&codec, &max, 700), max);
    }

    #[test]
    fn test_read_frame_hello() {
        let codec = FrameCodec::default();
        let mut reader = ChunkedReader::new(b"\x05\x00\x00\x00hello".to_vec(), 2);
        let mut buf = codec.buffer();

        assert_eq!(codec.read_frame(&mut reader, &mut buf).unwrap(), b"hello");
        assert_eq!(buf.capacity(), HEADER_LEN + MAX_PAYLOAD);
    }

    #[test]
    fn test_oversized_frame_consumes_only_header() {
        let codec = FrameCodec::default();
        let mut input = 5000u32.to_le_bytes().to_vec();
        input.extend_from_slice(&[b'x'; 16]);
        let mut reader = ChunkedReader::new(input, 64);
        let mut buf = codec.buffer();

        match codec.read_frame(&mut reader, &mut buf) {
            Err(FrameError::FrameTooLarge { declared: 5000, .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(reader.remaining(), 16);
    }

    #[test]
    fn test_clean_close_at_frame_boundary() {
        let codec = FrameCodec::default();
        let mut reader = ChunkedReader::new(Vec::new(), 4);
        let mut buf = codec.buffer();

        match codec.read_frame(&mut reader, &mut buf) {
            Err(FrameError::ConnectionClosed { cause }) => assert!(cause.is_eof()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_io_error_before_header_is_closed() {
        let codec = FrameCodec::default();
        let mut stream = FailingStream::new(ErrorKind::ConnectionReset);
        let mut buf = codec.buffer();

        match codec.read_frame(&mut stream, &mut buf) {
            Err(FrameError::ConnectionClosed {
                cause: ReadCause::Io(e),
            }) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_close_mid_header() {
        let codec = FrameCodec::default();
        let mut reader = ChunkedReader::new(vec![5, 0], 4);
        let mut buf = codec.buffer();

        match codec.read_frame(&mut reader, &mut buf) {
            Err(FrameError::ShortRead(e)) => assert_eq!(e.transferred(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_close_mid_payload() {
        let codec = FrameCodec::default();
        let mut reader = ChunkedReader::new(b"\x05\x00\x00\x00hel".to_vec(), 4);
        let mut buf = codec.buffer();

        match codec.read_frame(&mut reader, &mut buf) {
            Err(FrameError::TruncatedPayload(TransferError::ShortRead {
                expected: 5,
                received: 3,
                ..
            })) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_frames_share_buffer() {
        let codec = FrameCodec::default();
        let mut input = frame(b"first frame");
        input.extend(frame(b"two"));
        let mut reader = ChunkedReader::new(input, 3);
        let mut buf = codec.buffer();

        assert_eq!(codec.read_frame(&mut reader, &mut buf).unwrap(), b"first frame");
        assert_eq!(codec.read_frame(&mut reader, &mut buf).unwrap(), b"two");
        assert!(codec.read_frame(&mut reader, &mut buf).unwrap_err().is_closed());
    }

    #[test]
    fn test_small_limit() {
        let codec = FrameCodec::new(8);
        let mut reader = ChunkedReader::new(frame(b"123456789"), 16);
        let mut buf = codec.buffer();

        assert!(matches!(
            codec.read_frame(&mut reader, &mut buf),
            Err(FrameError::FrameTooLarge { declared: 9, max: 8 })
        ));
        assert_eq!(round_trip(&codec, b"12345678", 3), b"12345678");
    }

    #[test]
    fn test_zero_limit_allows_empty_only() {
        let codec = FrameCodec::new(0);
        assert_eq!(round_trip(&codec, b"", 1), b"");
        assert!(codec.encode_header(1).is_err());
    }

    #[test]
    fn test_buffer_grows_for_larger_codec() {
        let mut buf = TransferBuffer::new(2);
        let codec = FrameCodec::new(16);
        let mut reader = ChunkedReader::new(frame(b"0123456789"), 16);

        assert_eq!(codec.read_frame(&mut reader, &mut buf).unwrap(), b"0123456789");
    }

    #[test]
    fn test_write_frame_one_byte_at_a_time() {
        let codec = FrameCodec::default();
        let mut writer = ChunkedWriter::new(1);

        codec.write_frame(&mut writer, b"world").unwrap();
        assert_eq!(writer.written(), b"\x05\x00\x00\x00world");
    }

    #[test]
    fn test_write_oversized_writes_nothing() {
        let codec = FrameCodec::new(4);
        let mut writer = ChunkedWriter::new(64);

        assert!(matches!(
            codec.write_frame(&mut writer, b"too long"),
            Err(FrameError::FrameTooLarge { declared: 8, max: 4 })
        ));
        assert!(writer.written().is_empty());
    }

    #[test]
    fn test_write_failure_on_payload() {
        let codec = FrameCodec::default();
        let mut writer = ChunkedWriter::new(64).with_capacity(6);

        match codec.write_frame(&mut writer, b"world") {
            Err(FrameError::WriteFailure(e)) => assert_eq!(e.transferred(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_write_failure_on_header() {
        let codec = FrameCodec::default();
        let mut stream = FailingStream::new(ErrorKind::BrokenPipe);

        assert!(matches!(
            codec.write_frame(&mut stream, b"world"),
            Err(FrameError::WriteFailure(_))
        ));
    }
}
