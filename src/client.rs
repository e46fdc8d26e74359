//! Blocking client for the framing protocol.
//!
//! Sends each message as one frame on a single connection and waits for the
//! reply frame before sending the next.

use bytes::Bytes;
use std::net::TcpStream;
use thiserror::Error;
use tracing::debug;

use crate::config::ClientArgs;
use crate::framing::{FrameCodec, FrameError, TransferBuffer};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A connection to a server.
pub struct Client {
    stream: TcpStream,
    codec: FrameCodec,
    buf: TransferBuffer,
}

impl Client {
    pub fn connect(addr: &str, codec: FrameCodec) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        debug!(addr, "Connected");

        Ok(Self {
            stream,
            codec,
            buf: codec.buffer(),
        })
    }

    /// Send one request frame and wait for the reply.
    ///
    /// A server that hangs up instead of replying surfaces as
    /// `FrameError::ConnectionClosed`.
    pub fn request(&mut self, payload: &[u8]) -> Result<Bytes, ClientError> {
        self.codec.write_frame(&mut self.stream, payload)?;
        let reply = self.codec.read_frame(&mut self.stream, &mut self.buf)?;
        Ok(Bytes::copy_from_slice(reply))
    }
}

/// Send every message from `args` and print the replies.
pub fn run(args: &ClientArgs) -> Result<(), ClientError> {
    let mut client = Client::connect(&args.addr, FrameCodec::new(args.max_payload))?;

    for message in &args.messages {
        let reply = client.request(message.as_bytes())?;
        println!("server says: {}", String::from_utf8_lossy(&reply));
    }

    Ok(())
}
