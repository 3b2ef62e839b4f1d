//! Protocol module containing the message buffer, wire enums, and the codec.
//!
//! # How the wire format works
//!
//! Every piece of information exchanged between a device and the cloud
//! travels as one **CloudLink message** over the secure channel.  A message
//! consists of:
//!
//! 1. **Header** (4 bytes, always the same structure)
//!    `byte 0` packs the protocol version, the wire type (confirmable,
//!    non-confirmable, acknowledgement, or reset) and the token length.
//!    `byte 1` is the CoAP-style code (`class.detail`), and bytes 2–3 carry
//!    the 16-bit message id, big-endian.
//!
//! 2. **Token** (0 or 4 bytes in this system)
//!    Correlates a separate response with the request that caused it.
//!
//! 3. **Options** (variable)
//!    Delta/length nibble-encoded TLVs.  The first Uri-Path character names
//!    the operation (`d` = describe, `f` = function call, …); a single
//!    Uri-Query byte carries operation parameters such as describe flags.
//!
//! 4. **Payload** (variable)
//!    Preceded by a `0xFF` marker byte when present.
//!
//! # Sub-modules
//!
//! - **`messages`** – Wire enums, flag bitfields, and protocol constants.
//! - **`codec`**    – Pure decode functions, the option walker, and message
//!   builders.
//! - **`message`**  – The owned message buffer handed around by the engine.

pub mod codec;
pub mod message;
pub mod messages;

pub use codec::{CodecError, TokenDecode};
pub use message::Message;
pub use messages::{DescribeFlags, HelloFlags, MessageType, ProtocolFlags, Token, WireType};
