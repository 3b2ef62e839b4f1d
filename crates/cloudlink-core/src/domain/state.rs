//! Composite CRC record describing the device application state.
//!
//! # Why this exists
//!
//! When a secure session is resumed, the cloud still holds whatever device
//! description it cached during the previous connection.  Re-sending the
//! describe documents on every reconnect wastes airtime on constrained
//! links.  Instead, both sides keep a small record of checksums (one per
//! describe flavour plus the negotiated protocol flags) and the device
//! compares its current record against the copy cached in the session data.
//! Only when the masked comparison fails does the device fall back to the
//! full HELLO/describe exchange.
//!
//! A field that is absent on either side always fails the comparison for
//! that mask bit: the device elides messages only when it can *prove* the
//! cloud already has the same document version.

use serde::{Deserialize, Serialize};

/// Checksums of the device state the cloud caches across sessions.
///
/// Built in builder style; fields left unset stay absent and force
/// inequality under any mask that selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppStateDescriptor {
    system_describe_crc: Option<u32>,
    app_describe_crc: Option<u32>,
    subscriptions_crc: Option<u32>,
    protocol_flags: Option<u32>,
}

impl AppStateDescriptor {
    /// Mask bit selecting the system-describe checksum.
    pub const SYSTEM_DESCRIBE_CRC: u32 = 1 << 0;
    /// Mask bit selecting the application-describe checksum.
    pub const APP_DESCRIBE_CRC: u32 = 1 << 1;
    /// Mask bit selecting the subscriptions checksum.
    pub const SUBSCRIPTIONS_CRC: u32 = 1 << 2;
    /// Mask bit selecting the protocol flags.
    pub const PROTOCOL_FLAGS: u32 = 1 << 3;
    /// All mask bits.
    pub const ALL: u32 = Self::SYSTEM_DESCRIBE_CRC
        | Self::APP_DESCRIBE_CRC
        | Self::SUBSCRIPTIONS_CRC
        | Self::PROTOCOL_FLAGS;

    /// Creates an empty descriptor with every field absent.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_describe_crc(mut self, crc: u32) -> Self {
        self.system_describe_crc = Some(crc);
        self
    }

    pub fn with_app_describe_crc(mut self, crc: u32) -> Self {
        self.app_describe_crc = Some(crc);
        self
    }

    pub fn with_subscriptions_crc(mut self, crc: u32) -> Self {
        self.subscriptions_crc = Some(crc);
        self
    }

    pub fn with_protocol_flags(mut self, flags: u32) -> Self {
        self.protocol_flags = Some(flags);
        self
    }

    pub fn system_describe_crc(&self) -> Option<u32> {
        self.system_describe_crc
    }

    pub fn app_describe_crc(&self) -> Option<u32> {
        self.app_describe_crc
    }

    pub fn subscriptions_crc(&self) -> Option<u32> {
        self.subscriptions_crc
    }

    pub fn protocol_flags(&self) -> Option<u32> {
        self.protocol_flags
    }

    /// Masked equality: `true` iff every field selected by `mask` is present
    /// in both descriptors and numerically equal.
    pub fn equals_to(&self, other: &Self, mask: u32) -> bool {
        if mask & Self::SYSTEM_DESCRIBE_CRC != 0
            && !field_eq(self.system_describe_crc, other.system_describe_crc)
        {
            return false;
        }
        if mask & Self::APP_DESCRIBE_CRC != 0
            && !field_eq(self.app_describe_crc, other.app_describe_crc)
        {
            return false;
        }
        if mask & Self::SUBSCRIPTIONS_CRC != 0
            && !field_eq(self.subscriptions_crc, other.subscriptions_crc)
        {
            return false;
        }
        if mask & Self::PROTOCOL_FLAGS != 0
            && !field_eq(self.protocol_flags, other.protocol_flags)
        {
            return false;
        }
        true
    }
}

/// A field comparison succeeds only when both sides carry a value.
fn field_eq(a: Option<u32>, b: Option<u32>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}
