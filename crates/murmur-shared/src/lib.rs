//! # murmur-shared
//!
//! Types shared between the Murmur store and server: user identifiers,
//! handles, and the JSON frames exchanged over live channels.

pub mod constants;
pub mod protocol;
pub mod types;

pub use protocol::{AttachmentInfo, ErrorFrame, InboundFrame, MessageEvent};
pub use types::{Handle, UserId};
