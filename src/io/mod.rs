//! I/O module
//!
//! Handles the wire protocol shared by every service and the client.
//!
//! # Components
//!
//! - `frame_codec` - Request/response serialization and length-prefixed framing
//! - `channel` - Connection-bound transport in client and server roles

pub mod channel;
pub mod frame_codec;

pub use channel::{Channel, ListeningChannel, Readiness};
pub use frame_codec::{decode_request, decode_response, encode_request, encode_response};
