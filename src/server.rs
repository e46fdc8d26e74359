//! TCP server for length-prefixed request/response sessions.
//!
//! The `Acceptor` owns the listening socket and yields one connected
//! endpoint per accept. The `Server` hands each endpoint to a session.
//!
//! The baseline `sequential` mode serves one connection to completion
//! before accepting the next, so a slow peer holds up everyone queued behind
//! it. `threaded` and `tokio` modes lift that by giving each connection its
//! own thread or task; the framing and session contracts are the same.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::async_server;
use crate::config::{Config, ServeMode};
use crate::framing::{FrameCodec, FrameError};
use crate::handler::Handler;
use crate::session::{run_session, SessionSummary};

/// Failure to bring the service up. Nothing is retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to resolve listen address '{addr}': {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("listen address '{0}' resolved to nothing")]
    NoAddress(String),

    #[error("socket(): {0}")]
    Socket(io::Error),

    #[error("bind({addr}): {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("listen(): {0}")]
    Listen(io::Error),

    #[error("failed to start runtime: {0}")]
    Runtime(io::Error),
}

/// Listening socket.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Create, configure, bind and listen.
    pub fn bind(addr: &str) -> Result<Self, SetupError> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|source| SetupError::Resolve {
                addr: addr.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| SetupError::NoAddress(addr.to_string()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(SetupError::Socket)?;
        // allow restarting while old connections sit in TIME_WAIT
        socket.set_reuse_address(true).map_err(SetupError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|source| SetupError::Bind { addr, source })?;
        socket.listen(libc::SOMAXCONN).map_err(SetupError::Listen)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(SetupError::Socket)?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the next connection arrives.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept()
    }

    pub fn into_std(self) -> TcpListener {
        self.listener
    }
}

/// Server instance
pub struct Server {
    acceptor: Acceptor,
    codec: FrameCodec,
    handler: Arc<dyn Handler>,
    mode: ServeMode,
    read_timeout: Option<Duration>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &Config, handler: Arc<dyn Handler>) -> Result<Self, SetupError> {
        let acceptor = Acceptor::bind(&config.listen)?;

        Ok(Server {
            acceptor,
            codec: config.codec(),
            handler,
            mode: config.mode,
            read_timeout: config.read_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Accept and serve connections forever.
    ///
    /// Only setup failures return; accept errors are logged and skipped.
    pub fn run(self) -> Result<(), SetupError> {
        info!(
            address = %self.local_addr(),
            mode = ?self.mode,
            max_payload = self.codec.max_payload(),
            "Server listening"
        );

        match self.mode {
            ServeMode::Sequential => self.run_sequential(),
            ServeMode::Threaded => self.run_threaded(),
            ServeMode::Tokio => {
                async_server::run(self.acceptor, self.codec, self.handler, self.read_timeout)
            }
        }
    }

    fn run_sequential(&self) -> Result<(), SetupError> {
        loop {
            match self.acceptor.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    serve_connection(stream, peer, &self.codec, &*self.handler, self.read_timeout);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn run_threaded(&self) -> Result<(), SetupError> {
        loop {
            match self.acceptor.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let handler = Arc::clone(&self.handler);
                    let codec = self.codec;
                    let read_timeout = self.read_timeout;

                    let spawned = thread::Builder::new()
                        .name(format!("session-{peer}"))
                        .spawn(move || {
                            serve_connection(stream, peer, &codec, &*handler, read_timeout);
                        });
                    if let Err(e) = spawned {
                        warn!(peer = %peer, error = %e, "Failed to spawn session thread");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Run one session on a blocking stream; the stream is closed on return.
fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    codec: &FrameCodec,
    handler: &dyn Handler,
    read_timeout: Option<Duration>,
) {
    if let Err(e) = stream.set_read_timeout(read_timeout) {
        debug!(peer = %peer, error = %e, "Failed to set read timeout");
        return;
    }

    let result = run_session(stream, codec, handler);
    log_session_end(peer, &result);
}

/// Report how a session ended.
pub(crate) fn log_session_end(peer: SocketAddr, result: &Result<SessionSummary, FrameError>) {
    match result {
        Ok(summary) => {
            debug!(
                peer = %peer,
                frames = summary.frames,
                bytes_in = summary.bytes_in,
                bytes_out = summary.bytes_out,
                "Connection closed"
            );
        }
        Err(e @ FrameError::FrameTooLarge { .. }) => {
            warn!(peer = %peer, error = %e, "Protocol violation, closing connection");
        }
        Err(e) => {
            debug!(peer = %peer, error = %e, "Connection error");
        }
    }
}
