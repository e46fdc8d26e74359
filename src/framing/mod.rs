//! Length-prefixed framing.
//!
//! ## Wire Format
//!
//! Requests and responses use the same layout:
//!
//! ```text
//! +----------------------------+-----------------------------+
//! | length (u32, little-endian)| payload (length bytes)      |
//! +----------------------------+-----------------------------+
//!           4 bytes                 0 ..= max_payload
//! ```
//!
//! There is no version field, checksum or message type. A declared length
//! above `max_payload` is a protocol violation: the connection is dropped
//! without reading the payload and without an error frame.
//!
//! ## Layers
//! - `io`: blocking full-buffer read/write
//! - `async_io`: the same contract over tokio streams
//! - `codec`: header encoding/decoding and whole-frame transfer

pub mod async_io;
pub mod codec;
pub mod io;

pub use codec::{FrameCodec, FrameError, TransferBuffer, MAX_PAYLOAD};
pub use io::ReadCause;
