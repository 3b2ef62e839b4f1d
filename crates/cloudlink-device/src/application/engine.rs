//! The protocol engine: dispatch and session orchestration.
//!
//! [`Protocol`] owns the channel, the platform services, and the device
//! descriptor, and multiplexes every application-level operation over the
//! single secure channel.  The outer system loop drives it by calling
//! [`Protocol::event_loop`] repeatedly; the engine never blocks and never
//! spawns threads.
//!
//! # Message flow
//!
//! ```text
//! Channel::receive
//!   └─ handle_received_message()
//!        ├─ reply (ACK/RESET)?
//!        │    ├─ resolve ack-handler registry entry
//!        │    └─ describe ACK: compute + persist the describe CRC
//!        └─ dispatch by MessageType
//!             ├─ describe          → ACK + separate description response
//!             ├─ function/variable → handlers (token required)
//!             ├─ update/chunk/done → chunked transfer engine
//!             ├─ event             → subscriptions
//!             ├─ key change        → ACK + optional DISCARD_SESSION
//!             ├─ signal/hello/time/ping
//!             └─ error/unknown     → dropped on the floor
//! ```
//!
//! # Session lifecycle
//!
//! [`Protocol::begin`] establishes the channel.  On a resumed session it
//! re-keys the session, compares the current application state descriptor
//! against the copy cached in the session data; when they match it
//! skips the HELLO exchange entirely, sending only a keepalive.  Otherwise
//! it performs the full HELLO handshake and, when so configured, posts a
//! forced system describe.

use cloudlink_core::protocol::messages::{code, DescribeFlags, HelloFlags, ProtocolFlags};
use cloudlink_core::{codec, AppStateDescriptor, HelloPayload, Message, MessageType, Token, WireType, HEADER_SIZE};
use tracing::{error, info, trace, warn};

use crate::application::ack_handlers::AckHandlerRegistry;
use crate::application::channel::{
    Channel, ProtocolError, SessionCommand, SessionOutcome, SessionPersistGuard,
};
use crate::application::chunked_transfer::ChunkedTransfer;
use crate::application::describe::{self, BufferAppender};
use crate::application::descriptor::{AppStateSelector, AppStateUpdate, Descriptor};
use crate::application::functions;
use crate::application::pinger::{Pinger, PingerAction};
use crate::application::platform::Platform;
use crate::application::subscriptions::Subscriptions;
use crate::application::timesync::TimeSync;
use crate::application::variables;

/// How long the handshake waits for the cloud's HELLO when
/// [`ProtocolFlags::REQUIRE_HELLO_RESPONSE`] is set.
const HELLO_RESPONSE_TIMEOUT_MS: u64 = 4000;

/// Versioned engine configuration.
///
/// Consumers read only the fields they know about; fields added in newer
/// firmware are simply ignored by older readers of the persisted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Product family reported in HELLO.
    pub product_id: u16,
    /// Firmware version counter reported in HELLO.
    pub firmware_version: u16,
    /// Hardware platform id reported in HELLO.
    pub platform_id: u16,
    /// Factory-assigned device identity.
    pub device_id: [u8; 12],
    /// Engine behaviour flags.
    pub protocol_flags: ProtocolFlags,
    /// Quiet interval after which the pinger emits a keepalive.
    pub keepalive_interval_ms: u64,
    /// Deadline for outbound confirmable requests with completion handlers.
    pub ack_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            product_id: 0,
            firmware_version: 0,
            platform_id: 0,
            device_id: [0; 12],
            protocol_flags: ProtocolFlags(0),
            keepalive_interval_ms: 15_000,
            ack_timeout_ms: 30_000,
        }
    }
}

/// The device-side protocol engine.
///
/// Generic over its three ports so production transports and the mock stack
/// plug in the same way.
pub struct Protocol<C: Channel, P: Platform, D: Descriptor> {
    channel: C,
    platform: P,
    descriptor: D,
    config: ProtocolConfig,
    ack_handlers: AckHandlerRegistry,
    pinger: Pinger,
    timesync: TimeSync,
    chunked_transfer: ChunkedTransfer,
    subscriptions: Subscriptions,
    next_token: Token,
    last_message_millis: u64,
    last_ack_handlers_update: u64,
    app_describe_msg_id: Option<u16>,
    system_describe_msg_id: Option<u16>,
    subscriptions_msg_id: Option<u16>,
}

impl<C: Channel, P: Platform, D: Descriptor> Protocol<C, P, D> {
    /// Creates the engine and seeds the token counter from the platform RNG.
    pub fn new(channel: C, mut platform: P, descriptor: D, config: ProtocolConfig) -> Self {
        let mut seed = [0u8; 4];
        platform.fill_random(&mut seed);
        let now = platform.millis();
        Self {
            pinger: Pinger::new(config.keepalive_interval_ms),
            channel,
            platform,
            descriptor,
            config,
            ack_handlers: AckHandlerRegistry::new(),
            timesync: TimeSync::new(),
            chunked_transfer: ChunkedTransfer::new(),
            subscriptions: Subscriptions::new(),
            next_token: Token::from_be_bytes(seed),
            last_message_millis: now,
            last_ack_handlers_update: now,
            app_describe_msg_id: None,
            system_describe_msg_id: None,
            subscriptions_msg_id: None,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Registers an event-name prefix subscription.
    pub fn subscribe(&mut self, filter: &str) -> bool {
        self.subscriptions.subscribe(filter)
    }

    /// Message id of the outstanding application describe, if any.
    pub fn pending_app_describe(&self) -> Option<u16> {
        self.app_describe_msg_id
    }

    /// Message id of the outstanding system describe, if any.
    pub fn pending_system_describe(&self) -> Option<u16> {
        self.system_describe_msg_id
    }

    /// Number of live ack-handler registrations.
    pub fn pending_acks(&self) -> usize {
        self.ack_handlers.len()
    }

    /// Returns the next request token.  Seeded randomly at init and
    /// incremented per tokened request, so values never repeat within a
    /// session.
    fn get_next_token(&mut self) -> Token {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        token
    }

    // ── Session orchestration ─────────────────────────────────────────────────

    /// Establishes the session and performs the handshake.
    ///
    /// Returns [`SessionOutcome::Resumed`] only on the fast path where the
    /// cached application state matched and HELLO was skipped.
    ///
    /// # Errors
    ///
    /// Propagates channel errors; [`ProtocolError::MessageTimeout`] when a
    /// required HELLO response does not arrive.
    pub fn begin(&mut self) -> Result<SessionOutcome, ProtocolError> {
        info!("establishing secure connection");
        self.chunked_transfer.reset();
        self.pinger.reset();
        self.timesync.reset();
        self.ack_handlers.clear();
        self.last_ack_handlers_update = self.platform.millis();
        self.app_describe_msg_id = None;
        self.system_describe_msg_id = None;
        self.subscriptions_msg_id = None;

        let outcome = match self.channel.establish() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("handshake failed: {e}");
                return Err(e);
            }
        };

        if outcome == SessionOutcome::Resumed {
            // Unconditionally re-key the resumed session for forward secrecy.
            self.channel.command(SessionCommand::MoveSession)?;

            let current = self.app_state_descriptor();
            let cached = self.channel.cached_app_state_descriptor();
            let mut mask = AppStateDescriptor::ALL;
            if self
                .config
                .protocol_flags
                .contains(ProtocolFlags::DEVICE_INITIATED_DESCRIBE)
            {
                // The system decides when the application describe goes out,
                // so only the system document and flags gate the fast path.
                mask = AppStateDescriptor::SYSTEM_DESCRIBE_CRC | AppStateDescriptor::PROTOCOL_FLAGS;
            }
            if cached.equals_to(&current, mask) {
                info!("skipping hello message");
                self.ping()?;
                return Ok(SessionOutcome::Resumed);
            }
        }

        info!("sending hello message");
        let ota_successful = self.descriptor.was_ota_upgrade_successful();
        self.hello(ota_successful)?;

        if self
            .config
            .protocol_flags
            .contains(ProtocolFlags::REQUIRE_HELLO_RESPONSE)
        {
            info!("waiting for hello response");
            self.hello_response()?;
        }

        info!("handshake completed");
        self.channel.notify_established()?;
        self.update_protocol_flags()?;

        if self
            .config
            .protocol_flags
            .contains(ProtocolFlags::DEVICE_INITIATED_DESCRIBE)
        {
            self.post_description(DescribeFlags::SYSTEM, true)?;
        }

        Ok(SessionOutcome::Established)
    }

    /// Sends the HELLO message synchronously.
    fn hello(&mut self, was_ota_upgrade_successful: bool) -> Result<(), ProtocolError> {
        let mut flags = HelloFlags(HelloFlags::DIAGNOSTICS_SUPPORT | HelloFlags::IMMEDIATE_UPDATES_SUPPORT);
        if was_ota_upgrade_successful {
            flags.0 |= HelloFlags::OTA_UPGRADE_SUCCESSFUL;
        }
        if self
            .config
            .protocol_flags
            .contains(ProtocolFlags::DEVICE_INITIATED_DESCRIBE)
        {
            flags.0 |= HelloFlags::DEVICE_INITIATED_DESCRIBE;
        }
        let payload = HelloPayload {
            product_id: self.config.product_id,
            firmware_version: self.config.firmware_version,
            platform_id: self.config.platform_id,
            device_id: self.config.device_id,
            flags,
        };
        let mut message = self.channel.create()?;
        let len = codec::hello(message.buf_mut(), 0, &payload)?;
        message.set_len(len);
        message.set_confirm_received(true);
        self.last_message_millis = self.platform.millis();
        self.channel.send(&mut message)
    }

    fn hello_response(&mut self) -> Result<(), ProtocolError> {
        self.event_loop_until(MessageType::Hello, HELLO_RESPONSE_TIMEOUT_MS)
            .map_err(|e| {
                error!("handshake: could not receive hello response: {e}");
                e
            })
    }

    /// Sends a keepalive ping.
    pub fn ping(&mut self) -> Result<(), ProtocolError> {
        let mut message = self.channel.create()?;
        let len = codec::ping(message.buf_mut(), 0)?;
        message.set_len(len);
        self.channel.send(&mut message)?;
        self.last_message_millis = self.platform.millis();
        Ok(())
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Processes one event: expires ack handlers, receives at most one
    /// message and dispatches it, or runs idle work when the link is quiet.
    /// Returns the type of the processed message ([`MessageType::None`] when
    /// nothing arrived).
    ///
    /// # Errors
    ///
    /// Any error cancels an in-flight firmware transfer before it is
    /// returned; the caller typically tears the channel down.
    pub fn event_loop(&mut self) -> Result<MessageType, ProtocolError> {
        let result = self.event_loop_inner();
        if let Err(e) = &result {
            self.chunked_transfer.cancel(&mut self.platform);
            error!("event loop error: {e}");
        }
        result
    }

    fn event_loop_inner(&mut self) -> Result<MessageType, ProtocolError> {
        let now = self.platform.millis();
        self.ack_handlers
            .update(now.saturating_sub(self.last_ack_handlers_update));
        self.last_ack_handlers_update = now;

        match self.channel.receive()? {
            Some(message) if !message.is_empty() => self.handle_received_message(message),
            _ => {
                self.event_loop_idle()?;
                Ok(MessageType::None)
            }
        }
    }

    /// Runs the event loop until a message of `wanted` type is observed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTimeout`] when the wall-clock bound
    /// elapses first, or any error the event loop produced.
    pub fn event_loop_until(
        &mut self,
        wanted: MessageType,
        timeout_ms: u64,
    ) -> Result<(), ProtocolError> {
        let start = self.platform.millis();
        loop {
            let message_type = self.event_loop()?;
            if message_type == wanted {
                return Ok(());
            }
            if self.platform.millis().saturating_sub(start) >= timeout_ms {
                return Err(ProtocolError::MessageTimeout);
            }
        }
    }

    fn event_loop_idle(&mut self) -> Result<(), ProtocolError> {
        let now = self.platform.millis();
        self.chunked_transfer.idle(now, &mut self.platform);
        let quiet = now.saturating_sub(self.last_message_millis);
        match self.pinger.check(quiet) {
            PingerAction::None => Ok(()),
            PingerAction::SendPing => self.ping(),
            PingerAction::Timeout => Err(ProtocolError::PingTimeout),
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Decodes and dispatches one received message.
    fn handle_received_message(&mut self, message: Message) -> Result<MessageType, ProtocolError> {
        self.last_message_millis = self.platform.millis();
        self.pinger.message_received();

        if message.len() < HEADER_SIZE {
            return Ok(MessageType::None);
        }
        let bytes = message.bytes();
        let message_type = codec::message_type(bytes);
        let token = match codec::token(bytes) {
            codec::TokenDecode::Present(token) => Some(token),
            codec::TokenDecode::Absent => None,
            codec::TokenDecode::UnsupportedLength(len) => {
                error!("unsupported token length: {len}");
                None
            }
        };
        let msg_id = codec::message_id(bytes);
        let mut code_byte = codec::code(bytes);
        let wire_type = codec::wire_type(bytes);
        let (id_hi, id_lo) = (bytes[2], bytes[3]);

        if wire_type.is_reply() {
            trace!("reply received: type={wire_type:?}, code={code_byte:#04x}");
            if wire_type == WireType::Reset {
                // RST carries an empty code; treat it as an unspecified
                // server-side failure.
                trace!("reset received, mapping to internal server error");
                code_byte = code::INTERNAL_SERVER_ERROR;
            }
            self.notify_message_complete(msg_id, code_byte);

            // Update application state checksums for describe replies.
            if self.app_describe_msg_id == Some(msg_id) {
                self.app_describe_msg_id = None;
                if wire_type == WireType::Ack {
                    self.persist_describe_crc(AppStateSelector::DescribeApp)?;
                }
            }
            if self.system_describe_msg_id == Some(msg_id) {
                self.system_describe_msg_id = None;
                if wire_type == WireType::Ack {
                    self.persist_describe_crc(AppStateSelector::DescribeSystem)?;
                }
            }
            if self.subscriptions_msg_id == Some(msg_id) {
                self.subscriptions_msg_id = None;
                if wire_type == WireType::Ack {
                    self.update_subscription_crc()?;
                }
            }
        }

        match message_type {
            MessageType::Describe => {
                let desc_flags = match codec::uri_query_byte(message.bytes()) {
                    Some(byte) if byte <= DescribeFlags::MAX => byte,
                    Some(byte) => {
                        warn!("invalid describe flags {byte:#04x}");
                        DescribeFlags::DEFAULT
                    }
                    None => DescribeFlags::DEFAULT,
                };
                self.send_description_response(token, msg_id, desc_flags)?;
            }

            MessageType::FunctionCall => {
                let Some(token) = token else {
                    error!("missing request token");
                    return Err(ProtocolError::MissingRequestToken);
                };
                functions::handle_function_call(
                    token,
                    msg_id,
                    &message,
                    &mut self.channel,
                    &mut self.descriptor,
                )?;
            }

            MessageType::VariableRequest => {
                let Some(token) = token else {
                    error!("missing request token");
                    return Err(ProtocolError::MissingRequestToken);
                };
                variables::handle_request(
                    &message,
                    token,
                    msg_id,
                    &mut self.channel,
                    &mut self.descriptor,
                )?;
            }

            MessageType::SaveBegin | MessageType::UpdateBegin => {
                self.chunked_transfer.handle_update_begin(
                    token,
                    &message,
                    &mut self.channel,
                    &mut self.platform,
                )?;
            }

            MessageType::Chunk => {
                self.chunked_transfer.handle_chunk(
                    token,
                    &message,
                    &mut self.channel,
                    &mut self.platform,
                )?;
            }

            MessageType::UpdateDone => {
                self.chunked_transfer.handle_update_done(
                    token,
                    &message,
                    &mut self.channel,
                    &mut self.platform,
                )?;
            }

            MessageType::Event => {
                self.subscriptions
                    .handle_event(&message, &mut self.channel, &mut self.descriptor)?;
            }

            MessageType::KeyChange => {
                self.handle_key_change(&message)?;
            }

            MessageType::SignalStart | MessageType::SignalStop => {
                let on = message_type == MessageType::SignalStart;
                let mut ack = self.channel.create()?;
                let len = codec::coded_ack(ack.buf_mut(), token, code::CHANGED, id_hi, id_lo)?;
                ack.set_len(len);
                self.channel.send(&mut ack)?;
                self.platform.signal(on, 0);
            }

            MessageType::Hello => {
                if wire_type == WireType::Con {
                    self.send_empty_ack(msg_id)?;
                }
                self.descriptor.ota_upgrade_status_sent();
            }

            MessageType::Time => {
                if let Some(epoch) = codec::time_epoch(message.bytes()) {
                    let now = self.platform.millis();
                    self.timesync
                        .handle_time_response(epoch, now, &mut self.platform);
                }
            }

            MessageType::Ping => {
                let mut ack = self.channel.create()?;
                let len = codec::empty_ack(ack.buf_mut(), id_hi, id_lo)?;
                ack.set_len(len);
                self.channel.send(&mut ack)?;
            }

            MessageType::Error | MessageType::None => {
                // Drop it on the floor.
            }
        }

        Ok(message_type)
    }

    /// Translates a reply code and resolves the matching completion handler.
    fn notify_message_complete(&mut self, msg_id: u16, response_code: u8) {
        let class = code::class(response_code);
        let detail = code::detail(response_code);
        info!("message id {msg_id} complete with code {class}.{detail:02}");
        if code::is_success(response_code) {
            self.ack_handlers.set_result(msg_id);
        } else {
            let error = match class {
                4 => ProtocolError::CoapCode4xx,
                5 => ProtocolError::CoapCode5xx,
                _ => ProtocolError::CoapCode,
            };
            self.ack_handlers.set_error(msg_id, error);
        }
    }

    /// Handles a cloud-initiated key change: acknowledges it and, when the
    /// parameter option requests it, discards the session so the next
    /// connect renegotiates from scratch.
    fn handle_key_change(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let bytes = message.bytes();
        if codec::wire_type(bytes) == WireType::Con {
            self.send_empty_ack(codec::message_id(bytes))?;
        }

        // Header, message type option, token length; skip one byte for the
        // parameter option header.
        if message.len() > 7 {
            let option_idx = 7 + (bytes[0] & 0x0F) as usize;
            if message.bytes().get(option_idx) == Some(&1) {
                info!("cloud requested session discard");
                self.channel.command(SessionCommand::DiscardSession)?;
            }
        }
        Ok(())
    }

    fn send_empty_ack(&mut self, msg_id: u16) -> Result<(), ProtocolError> {
        let mut ack = self.channel.create()?;
        let len = codec::empty_ack(ack.buf_mut(), 0, 0)?;
        ack.set_len(len);
        ack.set_id(msg_id);
        self.channel.send(&mut ack)
    }

    // ── Application state ─────────────────────────────────────────────────────

    /// Snapshot of the current application state checksums, compared against
    /// the channel's cached copy to decide whether describes can be elided.
    pub fn app_state_descriptor(&mut self) -> AppStateDescriptor {
        if !self.descriptor.supports_state_selectors() {
            return AppStateDescriptor::new();
        }
        let system = self.descriptor.app_state_selector(
            AppStateSelector::DescribeSystem,
            AppStateUpdate::Compute,
            0,
        );
        let app = self.descriptor.app_state_selector(
            AppStateSelector::DescribeApp,
            AppStateUpdate::Compute,
            0,
        );
        AppStateDescriptor::new()
            .with_system_describe_crc(system)
            .with_app_describe_crc(app)
            .with_subscriptions_crc(self.subscriptions.compute_checksum(&self.platform))
            .with_protocol_flags(u32::from(self.config.protocol_flags.0))
    }

    /// Computes and persists the describe CRC after the cloud acknowledged a
    /// description, inside the save/load session envelope.
    fn persist_describe_crc(&mut self, selector: AppStateSelector) -> Result<(), ProtocolError> {
        if !self.descriptor.supports_state_selectors() {
            return Ok(());
        }
        let guard = SessionPersistGuard::new(&mut self.channel)?;
        self.descriptor
            .app_state_selector(selector, AppStateUpdate::ComputeAndPersist, 0);
        drop(guard);
        Ok(())
    }

    fn update_subscription_crc(&mut self) -> Result<(), ProtocolError> {
        if !self.descriptor.supports_state_selectors() {
            return Ok(());
        }
        let crc = self.subscriptions.compute_checksum(&self.platform);
        let guard = SessionPersistGuard::new(&mut self.channel)?;
        self.descriptor.app_state_selector(
            AppStateSelector::Subscriptions,
            AppStateUpdate::Persist,
            crc,
        );
        drop(guard);
        Ok(())
    }

    fn update_protocol_flags(&mut self) -> Result<(), ProtocolError> {
        if !self.descriptor.supports_state_selectors() {
            return Ok(());
        }
        let flags = u32::from(self.config.protocol_flags.0);
        let guard = SessionPersistGuard::new(&mut self.channel)?;
        self.descriptor.app_state_selector(
            AppStateSelector::ProtocolFlags,
            AppStateUpdate::Persist,
            flags,
        );
        drop(guard);
        Ok(())
    }

    // ── Describe posting ──────────────────────────────────────────────────────

    /// Posts a device-initiated describe.
    ///
    /// Without `force`, flavours whose cached CRC already matches the
    /// current state are dropped from the request; posting becomes a no-op
    /// when nothing remains.
    ///
    /// # Errors
    ///
    /// Propagates channel errors.
    pub fn post_description(&mut self, desc_flags: u8, force: bool) -> Result<(), ProtocolError> {
        let mut desc_flags = desc_flags;
        if !force {
            let current = self.app_state_descriptor();
            let cached = self.channel.cached_app_state_descriptor();
            if desc_flags & DescribeFlags::SYSTEM != 0
                && current.equals_to(&cached, AppStateDescriptor::SYSTEM_DESCRIBE_CRC)
            {
                info!("not sending system describe");
                desc_flags &= !DescribeFlags::SYSTEM;
            }
            if desc_flags & DescribeFlags::APPLICATION != 0
                && current.equals_to(&cached, AppStateDescriptor::APP_DESCRIBE_CRC)
            {
                info!("not sending application describe");
                desc_flags &= !DescribeFlags::APPLICATION;
            }
        }
        if desc_flags == 0 {
            return Ok(());
        }

        let mut message = self.channel.create()?;
        let token = self.get_next_token();
        let header_len = codec::describe_post_header(message.buf_mut(), 0, token, desc_flags)?;
        self.generate_and_send_description(message, header_len, desc_flags)
    }

    /// Answers a cloud-initiated describe: an empty ACK for the request id,
    /// then a separate response carrying the document under the same token.
    ///
    /// # Errors
    ///
    /// Propagates channel errors.
    pub fn send_description_response(
        &mut self,
        token: Option<Token>,
        msg_id: u16,
        desc_flags: u8,
    ) -> Result<(), ProtocolError> {
        self.send_empty_ack(msg_id)?;
        let mut message = self.channel.create()?;
        let header_len = codec::description_response(message.buf_mut(), 0, token)?;
        self.generate_and_send_description(message, header_len, desc_flags)
    }

    /// Emits the describe document into `message` after `header_len` bytes,
    /// sends it, and records the pending message ids for the flavours it
    /// carries.
    ///
    /// Overflowing the send buffer halts the device: truncated documents
    /// would make the cloud reconnect forever with no visible cause.
    fn generate_and_send_description(
        &mut self,
        mut message: Message,
        header_len: usize,
        desc_flags: u8,
    ) -> Result<(), ProtocolError> {
        let (body_len, overflow) = {
            let buf = message.buf_mut();
            let mut appender = BufferAppender::new(&mut buf[header_len..]);
            describe::build_describe_message(&self.descriptor, desc_flags, &mut appender);
            (appender.len(), appender.overflowed())
        };
        message.set_len(header_len + body_len);
        if overflow > 0 {
            error!("describe message overflowed by {overflow} bytes");
            panic!("describe message overflowed by {overflow} bytes");
        }

        info!(
            "posting '{}{}{}' describe message",
            if desc_flags & DescribeFlags::SYSTEM != 0 { "S" } else { "" },
            if desc_flags & DescribeFlags::APPLICATION != 0 { "A" } else { "" },
            if desc_flags & DescribeFlags::METRICS != 0 { "M" } else { "" },
        );

        self.channel.send(&mut message)?;
        let msg_id = message.id();
        if desc_flags & DescribeFlags::APPLICATION != 0 {
            self.app_describe_msg_id = Some(msg_id);
        }
        if desc_flags & DescribeFlags::SYSTEM != 0 {
            self.system_describe_msg_id = Some(msg_id);
        }
        Ok(())
    }

    /// Current size of the describe document for `desc_flags`, measured
    /// without allocating.
    pub fn describe_size(&self, desc_flags: u8) -> usize {
        describe::describe_size(&self.descriptor, desc_flags)
    }

    // ── Outbound operations ───────────────────────────────────────────────────

    /// Publishes an application event.  Confirmable events register the
    /// completion handlers against the assigned message id; exactly one of
    /// them fires on ACK, error reply, or timeout.  Non-confirmable events
    /// complete successfully as soon as they are queued.
    ///
    /// # Errors
    ///
    /// Propagates channel errors; completion handlers are not invoked when
    /// the send itself fails.
    pub fn publish_event(
        &mut self,
        name: &str,
        data: &[u8],
        confirmable: bool,
        on_success: impl FnOnce() + 'static,
        on_error: impl FnOnce(ProtocolError) + 'static,
    ) -> Result<(), ProtocolError> {
        let mut message = self.channel.create()?;
        let mut len = codec::event_post_header(message.buf_mut(), 0, name, confirmable)?;
        if !data.is_empty() {
            len = codec::append_payload(message.buf_mut(), len, data)?;
        }
        message.set_len(len);
        self.channel.send(&mut message)?;
        self.last_message_millis = self.platform.millis();
        if confirmable {
            self.ack_handlers.register(
                message.id(),
                self.config.ack_timeout_ms,
                Box::new(on_success),
                Box::new(on_error),
            );
        } else {
            on_success();
        }
        Ok(())
    }

    /// Requests the wall-clock time from the cloud.
    ///
    /// # Errors
    ///
    /// Propagates channel errors.
    pub fn request_time(&mut self) -> Result<(), ProtocolError> {
        let token = self.get_next_token();
        let mut message = self.channel.create()?;
        let len = codec::time_request(message.buf_mut(), 0, token)?;
        message.set_len(len);
        self.channel.send(&mut message)?;
        let now = self.platform.millis();
        self.last_message_millis = now;
        self.timesync.request_sent(now);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
