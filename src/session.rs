//! Request/response session loop.
//!
//! One session serves one connection: it reads a request frame, hands the
//! payload to the handler, writes the response frame, and repeats until the
//! peer closes or something fails. Requests are strictly one at a time; a
//! new request is not read until the previous response is fully written.
//!
//! ```text
//! AwaitingRequest -> Processing -> Replying -> AwaitingRequest
//!        |                             |
//!        +------------> Closed <-------+
//! ```

use bytes::Bytes;
use std::io::{Read, Write};
use tracing::{debug, trace};

use crate::framing::{FrameCodec, FrameError, TransferBuffer};
use crate::handler::Handler;

/// Current position in the request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next request frame.
    AwaitingRequest,
    /// A request payload is in the transfer buffer.
    Processing,
    /// A response is ready to be written.
    Replying,
    /// Terminal. The endpoint is released once the session is dropped.
    Closed,
}

/// Counters for a session that ended normally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Completed request/response exchanges.
    pub frames: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Read one request frame.
///
/// A `ConnectionClosed` result is the normal end of a session; it is logged
/// here so a clean EOF can be told apart from a read error.
pub fn decode_request<'b, S: Read + ?Sized>(
    codec: &FrameCodec,
    endpoint: &mut S,
    buf: &'b mut TransferBuffer,
) -> Result<&'b [u8], FrameError> {
    let result = codec.read_frame(endpoint, buf);
    log_request(&result);
    result
}

/// Trace a decoded request, or how the peer went away while we waited.
pub(crate) fn log_request(result: &Result<&[u8], FrameError>) {
    match result {
        Ok(payload) => trace!(len = payload.len(), "Request received"),
        Err(FrameError::ConnectionClosed { cause }) if cause.is_eof() => debug!("EOF"),
        Err(FrameError::ConnectionClosed { cause }) => {
            debug!(error = %cause, "Read error while awaiting request")
        }
        Err(_) => {}
    }
}

/// Write one response frame.
pub fn encode_response<S: Write + ?Sized>(
    codec: &FrameCodec,
    endpoint: &mut S,
    payload: &[u8],
) -> Result<(), FrameError> {
    codec.write_frame(endpoint, payload)?;
    trace!(len = payload.len(), "Response sent");
    Ok(())
}

/// State machine driving one connection.
pub struct Session<'h, S, H: ?Sized> {
    endpoint: S,
    codec: FrameCodec,
    handler: &'h H,
    buf: TransferBuffer,
    state: SessionState,
    request_len: usize,
    response: Bytes,
    summary: SessionSummary,
    error: Option<FrameError>,
}

impl<'h, S, H> Session<'h, S, H>
where
    S: Read + Write,
    H: Handler + ?Sized,
{
    /// Start a session on a freshly accepted endpoint.
    pub fn new(endpoint: S, codec: FrameCodec, handler: &'h H) -> Self {
        Self {
            endpoint,
            codec,
            handler,
            buf: codec.buffer(),
            state: SessionState::AwaitingRequest,
            request_len: 0,
            response: Bytes::new(),
            summary: SessionSummary::default(),
            error: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Perform one transition and return the new state.
    pub fn step(&mut self) -> SessionState {
        self.state = match self.state {
            SessionState::AwaitingRequest => {
                let decoded = decode_request(&self.codec, &mut self.endpoint, &mut self.buf)
                    .map(|payload| payload.len());
                match decoded {
                    Ok(len) => {
                        self.request_len = len;
                        SessionState::Processing
                    }
                    Err(e) => self.close(e),
                }
            }
            SessionState::Processing => {
                let request = self.buf.payload(self.request_len);
                self.response = self.handler.handle(request);
                self.summary.bytes_in += self.request_len as u64;
                SessionState::Replying
            }
            SessionState::Replying => {
                match encode_response(&self.codec, &mut self.endpoint, &self.response) {
                    Ok(()) => {
                        self.summary.frames += 1;
                        self.summary.bytes_out += self.response.len() as u64;
                        SessionState::AwaitingRequest
                    }
                    Err(e) => self.close(e),
                }
            }
            SessionState::Closed => SessionState::Closed,
        };
        trace!(state = ?self.state, "Session transition");
        self.state
    }

    /// Drive the session until it closes, then release the endpoint.
    ///
    /// A peer closing between frames is a normal end and returns the
    /// summary; anything else returns the error that closed the session.
    pub fn run(mut self) -> Result<SessionSummary, FrameError> {
        debug!(buffer = self.buf.capacity(), "Session started");
        while self.step() != SessionState::Closed {}

        let Session { summary, error, .. } = self;
        match error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn close(&mut self, error: FrameError) -> SessionState {
        if !error.is_closed() {
            self.error = Some(error);
        }
        SessionState::Closed
    }
}

/// Serve `endpoint` until the session closes. The endpoint is dropped
/// (and the connection closed) before this returns.
pub fn run_session<S, H>(
    endpoint: S,
    codec: &FrameCodec,
    handler: &H,
) -> Result<SessionSummary, FrameError>
where
    S: Read + Write,
    H: Handler + ?Sized,
{
    Session::new(endpoint, *codec, handler).run()
}
