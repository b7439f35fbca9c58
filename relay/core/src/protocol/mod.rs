//! Wire Protocol
//!
//! - [`types`]: message type codes and body payloads
//! - [`registry`]: the closed code-to-constructor table
//! - [`envelope`]: routing and trace metadata around a body
//! - [`codec`]: envelope encode/decode
//! - [`frame`]: length-prefixed, checksummed framing for byte streams

pub mod codec;
pub mod envelope;
pub mod frame;
pub mod registry;
pub mod types;

pub use codec::{decode, encode, encode_frame, DecodingError, EncodingError};
pub use envelope::{Envelope, TraceContext};
pub use frame::{FrameDecoder, FrameError};
pub use registry::MessageBody;
pub use types::*;
