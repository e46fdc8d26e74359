//! Request handlers.
//!
//! A handler turns one request payload into one response payload. It has no
//! access to the connection and keeps no per-session state, so the same
//! handler instance is shared by every session.

use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, HandlerKind};

/// Application logic behind the framing layer.
pub trait Handler: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Bytes;
}

impl<F> Handler for F
where
    F: Fn(&[u8]) -> Bytes + Send + Sync,
{
    fn handle(&self, payload: &[u8]) -> Bytes {
        self(payload)
    }
}

/// Logs each request as text and answers with a fixed reply.
#[derive(Debug, Clone)]
pub struct Greeter {
    reply: Bytes,
}

impl Greeter {
    pub fn new(reply: impl Into<Bytes>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for Greeter {
    fn default() -> Self {
        Self::new(Bytes::from_static(b"world"))
    }
}

impl Handler for Greeter {
    fn handle(&self, payload: &[u8]) -> Bytes {
        info!(message = %String::from_utf8_lossy(payload), "client says");
        self.reply.clone()
    }
}

/// Returns every request unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&self, payload: &[u8]) -> Bytes {
        Bytes::copy_from_slice(payload)
    }
}

/// Build the handler selected in `config`.
pub fn from_config(config: &Config) -> Arc<dyn Handler> {
    match config.handler {
        HandlerKind::Greet => Arc::new(Greeter::new(config.reply.clone())),
        HandlerKind::Echo => Arc::new(Echo),
    }
}
