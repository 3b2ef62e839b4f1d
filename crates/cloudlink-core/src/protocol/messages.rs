//! Wire enums, flag bitfields, and protocol constants.
//!
//! The canonical operation encoding on the wire is a single Uri-Path
//! character (see [`crate::protocol::codec::message_type`]); the enums here
//! are the typed view the engine dispatches on.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version encoded in the top two bits of the first header byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Token length used by this system.  A token is either absent or exactly
/// this many bytes; any other length on a received message is tolerated but
/// treated as no token.
pub const TOKEN_SIZE: usize = 4;

/// Request token, stored big-endian on the wire.
pub type Token = u32;

/// Maximum number of bytes of a function key emitted into the describe
/// document.  Longer keys are silently truncated on emit.
pub const MAX_FUNCTION_KEY_LENGTH: usize = 12;

/// Maximum number of bytes of a variable key emitted into the describe
/// document.  Longer keys are silently truncated on emit.
pub const MAX_VARIABLE_KEY_LENGTH: usize = 12;

/// Maximum accepted length of a published event name.
pub const MAX_EVENT_NAME_LENGTH: usize = 64;

// ── Option numbers ────────────────────────────────────────────────────────────

/// CoAP option numbers used by this protocol.
pub mod option {
    pub const URI_PATH: u16 = 11;
    pub const URI_QUERY: u16 = 15;
}

// ── Codes ─────────────────────────────────────────────────────────────────────

/// CoAP-style request/response codes (`class.detail` packed as
/// `class << 5 | detail`).
pub mod code {
    pub const EMPTY: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const POST: u8 = 0x02;
    pub const PUT: u8 = 0x03;
    /// 2.04 Changed – used to acknowledge accepted state changes (chunks,
    /// signals).
    pub const CHANGED: u8 = 0x44;
    /// 2.05 Content – carries a response body.
    pub const CONTENT: u8 = 0x45;
    /// 4.00 Bad Request.
    pub const BAD_REQUEST: u8 = 0x80;
    /// 4.04 Not Found.
    pub const NOT_FOUND: u8 = 0x84;
    /// 5.00 Internal Server Error – also substituted for the empty code of a
    /// RESET reply.
    pub const INTERNAL_SERVER_ERROR: u8 = 0xA0;

    /// Returns the code class (0–7).
    pub fn class(code: u8) -> u8 {
        code >> 5
    }

    /// Returns the code detail (0–31).
    pub fn detail(code: u8) -> u8 {
        code & 0x1F
    }

    /// Returns `true` for any 2.xx code.
    pub fn is_success(code: u8) -> bool {
        class(code) == 2
    }
}

// ── Wire type ─────────────────────────────────────────────────────────────────

/// The four transmission types of the constrained messaging format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WireType {
    /// Confirmable – the peer must acknowledge.
    Con = 0,
    /// Non-confirmable – fire and forget.
    Non = 1,
    /// Acknowledgement of a confirmable message.
    Ack = 2,
    /// Reset – the peer rejected the message.
    Reset = 3,
}

impl WireType {
    /// Decodes the two type bits of the first header byte.  All four values
    /// are valid, so this cannot fail.
    pub fn from_header(byte0: u8) -> Self {
        match (byte0 >> 4) & 0x03 {
            0 => WireType::Con,
            1 => WireType::Non,
            2 => WireType::Ack,
            _ => WireType::Reset,
        }
    }

    /// Returns `true` if this wire type is a reply to an earlier message
    /// (ACK or RESET) rather than a request.
    pub fn is_reply(self) -> bool {
        matches!(self, WireType::Ack | WireType::Reset)
    }
}

// ── Message classification ────────────────────────────────────────────────────

/// The application-level classification of a received message, produced by
/// [`crate::protocol::codec::message_type`].
///
/// A message is either a request from the cloud, a reply correlated by
/// message id, or empty.  `Error` marks a recognised-but-malformed message;
/// `None` marks anything the engine should ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Describe,
    FunctionCall,
    VariableRequest,
    SaveBegin,
    UpdateBegin,
    Chunk,
    UpdateDone,
    Event,
    KeyChange,
    SignalStart,
    SignalStop,
    Hello,
    Time,
    Ping,
    Error,
    None,
}

// ── Describe flags ────────────────────────────────────────────────────────────

/// Bitfield selecting which sections of the describe document to emit.
///
/// `METRICS` is exclusive: a request for metrics alone produces a binary
/// document; any combination of `SYSTEM` and `APPLICATION` produces the
/// textual (JSON) document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DescribeFlags(pub u8);

impl DescribeFlags {
    pub const SYSTEM: u8 = 0x01;
    pub const METRICS: u8 = 0x02;
    pub const APPLICATION: u8 = 0x04;
    /// What a describe request without an explicit type asks for.
    pub const DEFAULT: u8 = Self::SYSTEM | Self::APPLICATION;
    /// Highest valid flags byte; anything above this on the wire is invalid.
    pub const MAX: u8 = 0x07;

    pub fn system(self) -> bool {
        self.0 & Self::SYSTEM != 0
    }

    pub fn application(self) -> bool {
        self.0 & Self::APPLICATION != 0
    }

    /// Returns `true` when metrics are requested in isolation, which selects
    /// the binary document form.
    pub fn metrics_only(self) -> bool {
        self.0 == Self::METRICS
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ── Hello flags ───────────────────────────────────────────────────────────────

/// Capability/status byte carried in the HELLO payload.
///
/// Bits `0x08` and `0x10` are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HelloFlags(pub u8);

impl HelloFlags {
    pub const OTA_UPGRADE_SUCCESSFUL: u8 = 0x01;
    pub const DIAGNOSTICS_SUPPORT: u8 = 0x02;
    pub const IMMEDIATE_UPDATES_SUPPORT: u8 = 0x04;
    pub const DEVICE_INITIATED_DESCRIBE: u8 = 0x20;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

// ── Protocol flags ────────────────────────────────────────────────────────────

/// Negotiated/configured engine capabilities, persisted as part of the
/// application state descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolFlags(pub u8);

impl ProtocolFlags {
    /// The handshake must wait for the cloud's HELLO before completing.
    pub const REQUIRE_HELLO_RESPONSE: u8 = 0x01;
    /// The device decides when to send its application describe message
    /// instead of answering a cloud-initiated describe.
    pub const DEVICE_INITIATED_DESCRIBE: u8 = 0x02;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

// ── Hello payload ─────────────────────────────────────────────────────────────

/// Identity block carried in the HELLO message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Product family this firmware was built for.
    pub product_id: u16,
    /// Version counter of the running firmware.
    pub firmware_version: u16,
    /// Hardware platform identifier.
    pub platform_id: u16,
    /// Factory-assigned device identity.
    pub device_id: [u8; 12],
    /// Capability/status bits, see [`HelloFlags`].
    pub flags: HelloFlags,
}
