//! Tokio serving mode.
//!
//! Each accepted connection runs on its own task, so an idle peer no longer
//! blocks the others. The session loop is the same request/response cycle
//! as `session::Session`, over async streams.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, trace, warn};

use crate::framing::async_io::{read_frame, write_frame};
use crate::framing::{FrameCodec, FrameError};
use crate::handler::Handler;
use crate::server::{log_session_end, Acceptor, SetupError};
use crate::session::{log_request, SessionState, SessionSummary};

/// Build a multi-threaded runtime and serve connections on it forever.
pub fn run(
    acceptor: Acceptor,
    codec: FrameCodec,
    handler: Arc<dyn Handler>,
    read_timeout: Option<Duration>,
) -> Result<(), SetupError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lenframe-worker")
        .build()
        .map_err(SetupError::Runtime)?;

    runtime.block_on(serve(acceptor, codec, handler, read_timeout))
}

/// Accept loop. Must be called from within a tokio runtime.
pub async fn serve(
    acceptor: Acceptor,
    codec: FrameCodec,
    handler: Arc<dyn Handler>,
    read_timeout: Option<Duration>,
) -> Result<(), SetupError> {
    let listener = acceptor.into_std();
    listener.set_nonblocking(true).map_err(SetupError::Listen)?;
    let listener = TcpListener::from_std(listener).map_err(SetupError::Listen)?;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "New connection");
                let handler = Arc::clone(&handler);

                tokio::spawn(async move {
                    let result = run_session(stream, &codec, &*handler, read_timeout).await;
                    log_session_end(peer, &result);
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Serve one connection until it closes.
///
/// Runs the same state machine as `session::Session::step`. `read_timeout`
/// bounds each read; a peer that stalls partway through a frame ends the
/// session with `ShortRead` or `TruncatedPayload`, one that stalls between
/// frames ends it normally.
pub async fn run_session<S, H>(
    mut stream: S,
    codec: &FrameCodec,
    handler: &H,
    read_timeout: Option<Duration>,
) -> Result<SessionSummary, FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut buf = codec.buffer();
    let mut summary = SessionSummary::default();
    let mut state = SessionState::AwaitingRequest;
    let mut request_len = 0;
    let mut response = Bytes::new();
    let mut error = None;

    while state != SessionState::Closed {
        state = match state {
            SessionState::AwaitingRequest => {
                let decoded = read_frame(codec, &mut stream, &mut buf, read_timeout).await;
                log_request(&decoded);
                match decoded.map(|payload| payload.len()) {
                    Ok(len) => {
                        request_len = len;
                        SessionState::Processing
                    }
                    Err(e) => {
                        if !e.is_closed() {
                            error = Some(e);
                        }
                        SessionState::Closed
                    }
                }
            }
            SessionState::Processing => {
                response = handler.handle(buf.payload(request_len));
                summary.bytes_in += request_len as u64;
                SessionState::Replying
            }
            SessionState::Replying => match write_frame(codec, &mut stream, &response).await {
                Ok(()) => {
                    trace!(len = response.len(), "Response sent");
                    summary.frames += 1;
                    summary.bytes_out += response.len() as u64;
                    SessionState::AwaitingRequest
                }
                Err(e) => {
                    error = Some(e);
                    SessionState::Closed
                }
            },
            SessionState::Closed => SessionState::Closed,
        };
        trace!(state = ?state, "Session transition");
    }

    match error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
