//! Scripted mock channel for unit and integration testing.
//!
//! Tests queue inbound frames with [`MockChannel::push_incoming`], script
//! the establish outcome, and assert on the recorded outbound frames and
//! session commands.  The mock assigns message ids the way a real transport
//! does: a wire id of zero is replaced with the next id from its counter.

use std::collections::VecDeque;

use cloudlink_core::{codec, AppStateDescriptor, Message};

use crate::application::channel::{Channel, ProtocolError, SessionCommand, SessionOutcome};
use crate::infrastructure::descriptor::mock::SharedAppState;

/// Buffer capacity handed out by [`MockChannel::create`]; a conservative
/// datagram budget after encryption overhead.
pub const DEFAULT_CAPACITY: usize = 768;

/// A mock implementation of [`Channel`] that records all traffic.
pub struct MockChannel {
    capacity: usize,
    establish_result: Result<SessionOutcome, ProtocolError>,
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    commands: Vec<SessionCommand>,
    next_message_id: u16,
    established_notified: bool,
    receive_error: Option<ProtocolError>,
    send_error: Option<ProtocolError>,
    shared_state: SharedAppState,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            establish_result: Ok(SessionOutcome::Established),
            incoming: VecDeque::new(),
            sent: Vec::new(),
            commands: Vec::new(),
            next_message_id: 0x0100,
            established_notified: false,
            receive_error: None,
            send_error: None,
            shared_state: SharedAppState::new(),
        }
    }

    /// Creates a channel whose session cache is backed by `state`, the same
    /// store a [`crate::infrastructure::descriptor::mock::MockDescriptor`]
    /// persists into.
    pub fn with_shared_state(state: SharedAppState) -> Self {
        let mut channel = Self::new();
        channel.shared_state = state;
        channel
    }

    /// Scripts the next `establish` outcome.
    pub fn set_establish(&mut self, result: Result<SessionOutcome, ProtocolError>) {
        self.establish_result = result;
    }

    /// Queues an inbound frame for the next `receive`.
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.push_back(bytes.to_vec());
    }

    /// Makes the next `receive` fail with `error`.
    pub fn fail_next_receive(&mut self, error: ProtocolError) {
        self.receive_error = Some(error);
    }

    /// Makes the next `send` fail with `error`.
    pub fn fail_next_send(&mut self, error: ProtocolError) {
        self.send_error = Some(error);
    }

    /// All frames sent so far, oldest first.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// All session commands issued so far, oldest first.
    pub fn commands(&self) -> &[SessionCommand] {
        &self.commands
    }

    pub fn established_notified(&self) -> bool {
        self.established_notified
    }

    /// The shared persisted-state store backing the session cache.
    pub fn shared_state(&self) -> &SharedAppState {
        &self.shared_state
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MockChannel {
    fn establish(&mut self) -> Result<SessionOutcome, ProtocolError> {
        self.establish_result.clone()
    }

    fn create(&mut self) -> Result<Message, ProtocolError> {
        Ok(Message::with_capacity(self.capacity))
    }

    fn send(&mut self, message: &mut Message) -> Result<(), ProtocolError> {
        if let Some(error) = self.send_error.take() {
            return Err(error);
        }
        let wire_id = codec::message_id(message.bytes());
        if wire_id == 0 {
            let id = if message.id() != 0 {
                message.id()
            } else {
                self.next_message_id = self.next_message_id.wrapping_add(1);
                self.next_message_id
            };
            message.buf_mut()[2..4].copy_from_slice(&id.to_be_bytes());
            message.set_id(id);
        } else {
            message.set_id(wire_id);
        }
        self.sent.push(message.bytes().to_vec());
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(error) = self.receive_error.take() {
            return Err(error);
        }
        Ok(self
            .incoming
            .pop_front()
            .map(|bytes| Message::from_bytes(&bytes, self.capacity)))
    }

    fn command(&mut self, command: SessionCommand) -> Result<(), ProtocolError> {
        self.commands.push(command);
        Ok(())
    }

    fn cached_app_state_descriptor(&self) -> AppStateDescriptor {
        self.shared_state.descriptor()
    }

    fn notify_established(&mut self) -> Result<(), ProtocolError> {
        self.established_notified = true;
        Ok(())
    }
}
