//! The channel port: secure framed transport with session resumption.
//!
//! The engine never touches sockets or ciphers.  Everything below the
//! message layer (DTLS-style handshake, session caching, framing) sits
//! behind the [`Channel`] trait, injected at construction.  The engine
//! borrows message buffers from the channel and never retains them after
//! returning control.

use cloudlink_core::{AppStateDescriptor, CodecError, Message};
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by the engine and the channel.
///
/// Transport failures are passed through opaquely as [`ProtocolError::Channel`];
/// the engine adds the protocol-level kinds on top.  CoAP reply codes are
/// translated by class: 2.xx is success, 4.xx and 5.xx map to their own
/// variants, and a RESET counts as an internal server error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The expected message did not arrive within the wait bound.
    #[error("timed out waiting for a message")]
    MessageTimeout,

    /// A request that requires a token arrived without one.
    #[error("request is missing a token")]
    MissingRequestToken,

    /// The cloud replied with a 4xx response code.
    #[error("request rejected with a 4xx response code")]
    CoapCode4xx,

    /// The cloud replied with a 5xx response code.
    #[error("request failed with a 5xx response code")]
    CoapCode5xx,

    /// The cloud replied with a code outside the classes this engine maps.
    #[error("request failed with an unexpected response code")]
    CoapCode,

    /// A keepalive ping went unanswered for a full keepalive interval.
    #[error("keepalive ping went unanswered")]
    PingTimeout,

    /// A pending completion handler was displaced before its reply arrived.
    #[error("pending request cancelled")]
    Cancelled,

    /// A message could not be encoded into the channel's buffer.
    #[error("message could not be encoded: {0}")]
    Encode(#[from] CodecError),

    /// The secure handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An opaque transport-level failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// A firmware sink operation failed.
    #[error("firmware update failed: {0}")]
    FirmwareUpdate(String),
}

/// How a session came up.
///
/// `begin()` reports `Resumed` only on the fast path where the cached
/// application state matched and the HELLO exchange was skipped; a session
/// that resumed at the transport level but re-described still reports
/// `Established`, preserving the original contract until the cloud protocol
/// disambiguates the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Full handshake: HELLO sent (and answered, when required).
    Established,
    /// Transport session resumed and cached state matched; HELLO skipped.
    Resumed,
}

/// Opaque commands against the channel's session data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Snapshot live session state before the descriptor callback reads or
    /// writes persisted bytes.
    SaveSession,
    /// Reload session state after the descriptor callback finished.
    LoadSession,
    /// Re-key a resumed session for forward secrecy.
    MoveSession,
    /// Drop the cached session entirely, forcing a full renegotiation on
    /// the next connect.
    DiscardSession,
}

/// The secure transport the engine is layered on.
///
/// Implementations provide message framing, session establishment with
/// resumption, and the opaque session-data command surface.  Buffers are
/// owned by the channel: [`Channel::create`] hands out a message sized for
/// the link, and the engine writes directly into it.
pub trait Channel {
    /// Establishes (or resumes) the secure session.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ProtocolError`] when the handshake fails.
    fn establish(&mut self) -> Result<SessionOutcome, ProtocolError>;

    /// Allocates an outbound message sized for this channel.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Channel`] when no buffer is available.
    fn create(&mut self) -> Result<Message, ProtocolError>;

    /// Sends a message.  A wire message id of zero is replaced with a fresh
    /// id, which is reported back through [`Message::id`].  When
    /// [`Message::confirm_received`] is set the call blocks until the peer
    /// acknowledged (or the transport gave up).
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ProtocolError`] when the send fails.
    fn send(&mut self, message: &mut Message) -> Result<(), ProtocolError>;

    /// Receives one message if any is pending.  Returns `Ok(None)` when the
    /// link is idle; this is what drives the engine's idle work.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ProtocolError`] when the receive fails.
    fn receive(&mut self) -> Result<Option<Message>, ProtocolError>;

    /// Executes a session-data command.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ProtocolError`] when the command fails.
    fn command(&mut self, command: SessionCommand) -> Result<(), ProtocolError>;

    /// The application-state descriptor cached in the session data from the
    /// previous connection, or an empty descriptor when none is cached.
    fn cached_app_state_descriptor(&self) -> AppStateDescriptor;

    /// Notifies the transport that the handshake completed, letting it
    /// persist whatever it caches across sessions.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`ProtocolError`] when persistence fails.
    fn notify_established(&mut self) -> Result<(), ProtocolError>;
}

/// Scoped SAVE_SESSION / LOAD_SESSION envelope.
///
/// Every descriptor-callback invocation that reads or writes persisted
/// session bytes must run inside this guard: it issues `SaveSession` on
/// construction and `LoadSession` when dropped, so the session buffer is
/// never mutated re-entrantly while the callback works on it.
pub struct SessionPersistGuard<'a, C: Channel> {
    channel: &'a mut C,
}

impl<'a, C: Channel> SessionPersistGuard<'a, C> {
    /// Issues `SaveSession` and arms the `LoadSession` on drop.
    ///
    /// # Errors
    ///
    /// Propagates the channel error when `SaveSession` fails, in which case
    /// no guard is created and no `LoadSession` will be issued.
    pub fn new(channel: &'a mut C) -> Result<Self, ProtocolError> {
        channel.command(SessionCommand::SaveSession)?;
        Ok(Self { channel })
    }
}

impl<C: Channel> Drop for SessionPersistGuard<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.command(SessionCommand::LoadSession) {
            warn!("failed to reload session state: {e}");
        }
    }
}
