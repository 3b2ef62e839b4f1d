//! Event subscriptions and incoming event dispatch.
//!
//! The application registers event-name prefixes it wants to receive; the
//! cloud forwards matching events published elsewhere.  An incoming event is
//! a POST with Uri-Path `e` (or `E`) followed by the event name segments and
//! the event data as payload.
//!
//! The subscription list also feeds the session state descriptor: its
//! checksum is one of the four fields the cloud caches, so a changed
//! subscription set forces a re-announce on the next session resume.

use cloudlink_core::{codec, Message, WireType};
use tracing::{debug, warn};

use crate::application::channel::{Channel, ProtocolError};
use crate::application::descriptor::Descriptor;
use crate::application::platform::Platform;

/// Upper bound on registered subscriptions, matching the constrained
/// per-device budget enforced by the cloud.
pub const MAX_SUBSCRIPTIONS: usize = 16;

/// Registered event-name prefixes.
#[derive(Debug, Default)]
pub struct Subscriptions {
    filters: Vec<String>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event-name prefix.  Returns `false` when the table is
    /// full or the filter is already present.
    pub fn subscribe(&mut self, filter: &str) -> bool {
        if self.filters.len() >= MAX_SUBSCRIPTIONS
            || self.filters.iter().any(|existing| existing == filter)
        {
            return false;
        }
        self.filters.push(filter.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether an event name matches any registered prefix.
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.filters.iter().any(|filter| event.starts_with(filter.as_str()))
    }

    /// Checksum of the registered filters, fed into the application state
    /// descriptor.
    pub fn compute_checksum<P: Platform>(&self, platform: &P) -> u32 {
        let mut bytes = Vec::new();
        for filter in &self.filters {
            bytes.extend_from_slice(filter.as_bytes());
            bytes.push(0);
        }
        platform.calculate_crc(&bytes)
    }

    /// Dispatches one incoming event: acknowledges confirmable delivery and
    /// hands matching events to the application's handler.
    ///
    /// Events without a name, and events no subscription matches, are
    /// dropped without error.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the acknowledgement cannot be sent.
    pub fn handle_event<C: Channel, D: Descriptor>(
        &self,
        message: &Message,
        channel: &mut C,
        descriptor: &mut D,
    ) -> Result<(), ProtocolError> {
        let bytes = message.bytes();
        if codec::wire_type(bytes) == WireType::Con {
            let mut ack = channel.create()?;
            let len = codec::empty_ack(ack.buf_mut(), bytes[2], bytes[3])?;
            ack.set_len(len);
            channel.send(&mut ack)?;
        }

        let Some(name) = codec::event_name(bytes) else {
            warn!("event without a name dropped");
            return Ok(());
        };
        if self.is_subscribed(&name) {
            descriptor.call_event_handler(&name, codec::payload(bytes));
        } else {
            debug!("no subscription matches event '{name}'");
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
