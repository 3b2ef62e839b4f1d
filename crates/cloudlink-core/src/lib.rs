//! # cloudlink-core
//!
//! Shared library for CloudLink containing the constrained-messaging wire
//! codec, message classification, and the domain types that describe device
//! application state.
//!
//! This crate is used by the device-side protocol engine and by any tooling
//! that needs to inspect CloudLink traffic.  It has zero dependencies on OS
//! APIs, cryptography, or network sockets.
//!
//! # Architecture overview
//!
//! CloudLink is a device-to-cloud messaging protocol for embedded IoT
//! devices.  A device multiplexes all of its application-level operations
//! (variable reads, function calls, event publication, firmware updates,
//! time sync, description exchange) over a single secure datagram channel
//! using a compact CoAP-like message format.
//!
//! This crate (`cloudlink-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the channel.  A message is a
//!   4-byte header, an optional 4-byte token, TLV-encoded options, and a
//!   payload behind a `0xFF` marker.  The codec exposes pure functions that
//!   decode header fields and build the handful of messages the device
//!   originates.
//!
//! - **`domain`** – Pure business records with no I/O.  The most important
//!   piece is the [`AppStateDescriptor`]: a composite CRC record used to
//!   prove to the cloud that its cached copy of the device description is
//!   still current, so redundant describe messages can be elided on session
//!   resume.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `cloudlink_core::Message` instead of `cloudlink_core::protocol::message::Message`.
pub use domain::state::AppStateDescriptor;
pub use protocol::codec::{self, CodecError, TokenDecode};
pub use protocol::message::Message;
pub use protocol::messages::{
    DescribeFlags, HelloFlags, HelloPayload, MessageType, ProtocolFlags, Token, WireType,
    HEADER_SIZE,
};
