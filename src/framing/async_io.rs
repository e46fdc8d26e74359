//! Full-buffer transfer and frame I/O over tokio streams.
//!
//! Mirrors `framing::io` and `FrameCodec::{read_frame, write_frame}` for
//! the tokio runtime. Header validation is shared through
//! `FrameCodec::parse_header` and `FrameCodec::encode_header`, so both paths
//! enforce the same limits and report the same errors.

use std::io::{self, ErrorKind};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::{FrameCodec, FrameError, TransferBuffer, HEADER_LEN};
use super::io::{ReadCause, TransferError, WriteCause};

/// Fill `buf` completely from `stream`.
///
/// `timeout` bounds each individual read, the way `SO_RCVTIMEO` does for
/// blocking sockets. An expired read fails with `TimedOut` and keeps the
/// count of bytes already received. `Interrupted` is re-issued, as
/// `std::io::Read::read_exact` does; any other error or a zero-byte read
/// ends the transfer.
pub async fn read_full<R>(
    stream: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let expected = buf.len();
    let mut received = 0;

    while received < expected {
        let read = stream.read(&mut buf[received..]);
        let result = match timeout {
            None => read.await,
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(ErrorKind::TimedOut, "read timed out"))),
        };

        match result {
            Ok(0) => {
                return Err(TransferError::ShortRead {
                    expected,
                    received,
                    cause: ReadCause::Eof,
                })
            }
            Ok(n) => received += n,
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
/// `Interrupted` is re-issued, as `std::io::Write::write_all` does.
pub async fn write_all<W>(stream: &mut W, buf: &[u8]) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let expected = buf.len();
    let mut written = 0;

    while written < expected {
        match stream.write(&buf[written..]).await {
            Ok(0) => {
                return Err(TransferError::ShortWrite {
                    expected,
                    written,
                    cause: WriteCause::Stalled,
                })
            }
            Ok(n) => written += n,
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

/// Read one frame. Same error mapping as `FrameCodec::read_frame`.
///
/// A read that times out before the first header byte is a closed
/// connection; one that times out later is `ShortRead` or
/// `TruncatedPayload`.
pub async fn read_frame<'b, R>(
    codec: &FrameCodec,
    stream: &mut R,
    buf: &'b mut TransferBuffer,
    timeout: Option<Duration>,
) -> Result<&'b [u8], FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_full(stream, buf.header_mut(), timeout).await.map_err(|e| match e {
        TransferError::ShortRead {
            received: 0, cause, ..
        } => FrameError::ConnectionClosed { cause },
        other => FrameError::ShortRead(other),
    })?;

    let len = codec.parse_header(buf.header())?;

    read_full(stream, buf.payload_mut(len), timeout)
        .await
        .map_err(FrameError::TruncatedPayload)?;

    Ok(buf.payload(len))
}

/// Write `payload` as one frame.
pub async fn write_frame<W>(codec: &FrameCodec, stream: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = codec.encode_header(payload.len())?;

    write_all(stream, &header).await.map_err(FrameError::WriteFailure)?;
    write_all(stream, payload).await.map_err(FrameError::WriteFailure)?;
    stream.flush().await.map_err(|e| {
        let frame_len = HEADER_LEN + payload.len();
        FrameError::WriteFailure(TransferError::ShortWrite {
            expected: frame_len,
            written: frame_len,
            cause: WriteCause::Flush(e),
        })
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio_test::io::Builder;

    /// Accepts every write, fails every flush.
    struct FlushFails;

    impl AsyncWrite for FlushFails {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_frame_across_fragments() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new()
            .read(b"\x05\x00")
            .read(b"\x00\x00he")
            .read(b"llo")
            .build();
        let mut buf = codec.buffer();

        let payload = read_frame(&codec, &mut stream, &mut buf, None).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_clean_close() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new().build();
        let mut buf = codec.buffer();

        let err = read_frame(&codec, &mut stream, &mut buf, None).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_read_frame_oversized() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new().read(&5000u32.to_le_bytes()).build();
        let mut buf = codec.buffer();

        assert!(matches!(
            read_frame(&codec, &mut stream, &mut buf, None).await,
            Err(FrameError::FrameTooLarge { declared: 5000, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new().read(b"\x05\x00\x00\x00he").build();
        let mut buf = codec.buffer();

        assert!(matches!(
            read_frame(&codec, &mut stream, &mut buf, None).await,
            Err(FrameError::TruncatedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_read_error_before_header() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new()
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let mut buf = codec.buffer();

        match read_frame(&codec, &mut stream, &mut buf, None).await {
            Err(FrameError::ConnectionClosed {
                cause: ReadCause::Io(e),
            }) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_frame() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new().write(b"\x05\x00\x00\x00world").build();

        write_frame(&codec, &mut stream, b"world").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_frame_error() {
        let codec = FrameCodec::default();
        let mut stream = Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        assert!(matches!(
            write_frame(&codec, &mut stream, b"world").await,
            Err(FrameError::WriteFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_write_frame_flush_failure() {
        let codec = FrameCodec::default();

        match write_frame(&codec, &mut FlushFails, b"world").await {
            Err(FrameError::WriteFailure(TransferError::ShortWrite {
                expected: 9,
                written: 9,
                cause: WriteCause::Flush(e),
            })) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_before_header_is_closed() {
        let codec = FrameCodec::default();
        let (_client, mut server) = tokio::io::duplex(64);
        let mut buf = codec.buffer();

        match read_frame(&codec, &mut server, &mut buf, Some(Duration::from_millis(50))).await {
            Err(FrameError::ConnectionClosed {
                cause: ReadCause::Io(e),
            }) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_mid_header() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"\x05\x00").await.unwrap();
        let mut buf = codec.buffer();

        match read_frame(&codec, &mut server, &mut buf, Some(Duration::from_millis(50))).await {
            Err(FrameError::ShortRead(TransferError::ShortRead {
                received: 2,
                cause: ReadCause::Io(e),
                ..
            })) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_mid_payload() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"\x05\x00\x00\x00he").await.unwrap();
        let mut buf = codec.buffer();

        match read_frame(&codec, &mut server, &mut buf, Some(Duration::from_millis(50))).await {
            Err(FrameError::TruncatedPayload(TransferError::ShortRead {
                expected: 5,
                received: 2,
                ..
            })) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_resets_per_read() {
        let codec = FrameCodec::default();
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buf = codec.buffer();

        let sender = tokio::spawn(async move {
            let chunks: [&[u8]; 4] = [b"\x02\x00", b"\x00\x00", b"o", b"k"];
            for chunk in chunks {
                tokio::time::sleep(Duration::from_millis(80)).await;
                client.write_all(chunk).await.unwrap();
            }
            client
        });

        let payload = read_frame(&codec, &mut server, &mut buf, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(payload, b"ok");
        sender.await.unwrap();
    }
}
