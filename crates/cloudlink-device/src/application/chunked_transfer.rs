//! Chunked firmware transfer.
//!
//! An over-the-air update is announced with an update-begin message carrying
//! the file geometry, streamed as individually CRC-protected chunks, and
//! finalised with update-done.  The engine verifies each chunk before it
//! reaches the platform's firmware sink and acknowledges it with 2.04, or
//! 4.00 when the checksum fails so the cloud retransmits.
//!
//! Wire payloads:
//!
//! ```text
//! update begin:  [file_size:4][chunk_size:2][file_crc:4]
//! chunk:         [chunk_crc:4][chunk_index:2][data…]
//! update done:   (empty)
//! ```
//!
//! A transfer that stalls for [`TRANSFER_STALL_TIMEOUT_MS`] is cancelled
//! from the engine's idle work; any protocol error cancels it immediately.

use cloudlink_core::protocol::messages::code;
use cloudlink_core::{codec, Message, Token};
use tracing::{info, warn};

use crate::application::channel::{Channel, ProtocolError};
use crate::application::platform::{FirmwareInfo, Platform};

/// How long a transfer may sit without a chunk before it is abandoned.
pub const TRANSFER_STALL_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug)]
struct Transfer {
    info: FirmwareInfo,
    chunks_received: u32,
    last_activity_millis: u64,
}

/// State machine for one firmware transfer at a time.
#[derive(Debug, Default)]
pub struct ChunkedTransfer {
    transfer: Option<Transfer>,
}

impl ChunkedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops transfer state without touching the sink; called at session
    /// start, before any sink work can be in flight.
    pub fn reset(&mut self) {
        self.transfer = None;
    }

    pub fn in_progress(&self) -> bool {
        self.transfer.is_some()
    }

    /// Aborts an in-flight transfer and tells the sink to discard partial
    /// data.  Safe to call when nothing is in flight.
    pub fn cancel<P: Platform>(&mut self, platform: &mut P) {
        if self.transfer.take().is_some() {
            warn!("cancelling firmware transfer");
            if let Err(e) = platform.finish_firmware_update(false) {
                warn!("firmware sink abort failed: {e}");
            }
        }
    }

    /// Cancels a transfer that has stalled past the timeout.
    pub fn idle<P: Platform>(&mut self, now: u64, platform: &mut P) {
        let stalled = self
            .transfer
            .as_ref()
            .is_some_and(|t| now.saturating_sub(t.last_activity_millis) > TRANSFER_STALL_TIMEOUT_MS);
        if stalled {
            warn!("firmware transfer stalled");
            self.cancel(platform);
        }
    }

    /// Handles update-begin (and save-begin) announcements.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the acknowledgement cannot be sent;
    /// malformed announcements and sink failures are reported to the cloud
    /// via response codes instead.
    pub fn handle_update_begin<C: Channel, P: Platform>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        platform: &mut P,
    ) -> Result<(), ProtocolError> {
        let bytes = message.bytes();
        let (id_hi, id_lo) = (bytes[2], bytes[3]);
        let payload = codec::payload(bytes);
        if payload.len() < 10 {
            warn!("update begin with short payload ({} bytes)", payload.len());
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        }
        let info = FirmwareInfo {
            file_size: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            chunk_size: u16::from_be_bytes([payload[4], payload[5]]),
            file_crc: u32::from_be_bytes([payload[6], payload[7], payload[8], payload[9]]),
        };
        if info.chunk_size == 0 {
            warn!("update begin with zero chunk size");
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        }

        match platform.prepare_firmware_update(&info) {
            Ok(()) => {
                info!(
                    "firmware transfer started: {} bytes in {}-byte chunks",
                    info.file_size, info.chunk_size
                );
                self.transfer = Some(Transfer {
                    info,
                    chunks_received: 0,
                    last_activity_millis: platform.millis(),
                });
                reply_ack(channel, token, code::CHANGED, id_hi, id_lo)
            }
            Err(e) => {
                warn!("firmware sink refused update: {e}");
                reply_ack(channel, token, code::INTERNAL_SERVER_ERROR, id_hi, id_lo)
            }
        }
    }

    /// Handles one firmware chunk.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the acknowledgement cannot be sent, or
    /// a sink error when a verified chunk cannot be stored (the caller then
    /// cancels the transfer).
    pub fn handle_chunk<C: Channel, P: Platform>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        platform: &mut P,
    ) -> Result<(), ProtocolError> {
        let bytes = message.bytes();
        let (id_hi, id_lo) = (bytes[2], bytes[3]);
        let Some(transfer) = self.transfer.as_mut() else {
            warn!("chunk received with no transfer in progress");
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        };
        let payload = codec::payload(bytes);
        if payload.len() < 6 {
            warn!("chunk with short payload ({} bytes)", payload.len());
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        }
        let expected_crc = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let index = u16::from_be_bytes([payload[4], payload[5]]);
        let data = &payload[6..];

        if platform.calculate_crc(data) != expected_crc {
            warn!("chunk {index} failed checksum verification");
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        }

        let offset = u32::from(index) * u32::from(transfer.info.chunk_size);
        platform.save_firmware_chunk(offset, data)?;
        transfer.chunks_received += 1;
        transfer.last_activity_millis = platform.millis();
        reply_ack(channel, token, code::CHANGED, id_hi, id_lo)
    }

    /// Handles the update-done message.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the acknowledgement cannot be sent, or
    /// a sink error when finalisation fails.
    pub fn handle_update_done<C: Channel, P: Platform>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        platform: &mut P,
    ) -> Result<(), ProtocolError> {
        let bytes = message.bytes();
        let (id_hi, id_lo) = (bytes[2], bytes[3]);
        let Some(transfer) = self.transfer.take() else {
            warn!("update done with no transfer in progress");
            return reply_ack(channel, token, code::BAD_REQUEST, id_hi, id_lo);
        };
        platform.finish_firmware_update(true)?;
        info!(
            "firmware transfer complete: {} chunks received",
            transfer.chunks_received
        );
        reply_ack(channel, token, code::CHANGED, id_hi, id_lo)
    }
}

fn reply_ack<C: Channel>(
    channel: &mut C,
    token: Option<Token>,
    code_byte: u8,
    id_hi: u8,
    id_lo: u8,
) -> Result<(), ProtocolError> {
    let mut ack = channel.create()?;
    let len = codec::coded_ack(ack.buf_mut(), token, code_byte, id_hi, id_lo)?;
    ack.set_len(len);
    channel.send(&mut ack)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::channel::mock::MockChannel;
    use crate::infrastructure::platform::mock::MockPlatform;

    fn begin_message(file_size: u32, chunk_size: u16, file_crc: u32) -> Message {
        let mut bytes = vec![0x40, 0x02, 0x00, 0x11, 0xB1, b'u', 0xFF];
        bytes.extend_from_slice(&file_size.to_be_bytes());
        bytes.extend_from_slice(&chunk_size.to_be_bytes());
        bytes.extend_from_slice(&file_crc.to_be_bytes());
        Message::from_bytes(&bytes, 256)
    }

    fn chunk_message(platform: &MockPlatform, index: u16, data: &[u8]) -> Message {
        let mut bytes = vec![0x40, 0x02, 0x00, 0x12, 0xB1, b'c', 0xFF];
        bytes.extend_from_slice(&platform.calculate_crc(data).to_be_bytes());
        bytes.extend_from_slice(&index.to_be_bytes());
        bytes.extend_from_slice(data);
        Message::from_bytes(&bytes, 256)
    }

    fn done_message() -> Message {
        Message::from_bytes(&[0x40, 0x03, 0x00, 0x13, 0xB1, b'u'], 256)
    }

    #[test]
    fn test_full_transfer_happy_path() {
        // Arrange
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();

        // Act – begin, two chunks, done.
        transfer
            .handle_update_begin(None, &begin_message(512, 256, 0xAB), &mut channel, &mut platform)
            .unwrap();
        assert!(transfer.in_progress());
        transfer
            .handle_chunk(None, &chunk_message(&platform, 0, &[0x01; 256]), &mut channel, &mut platform)
            .unwrap();
        transfer
            .handle_chunk(None, &chunk_message(&platform, 1, &[0x02; 256]), &mut channel, &mut platform)
            .unwrap();
        transfer
            .handle_update_done(None, &done_message(), &mut channel, &mut platform)
            .unwrap();

        // Assert – every step acknowledged with 2.04, sink saw both chunks
        // at their offsets, and the update finished successfully.
        assert!(!transfer.in_progress());
        for frame in channel.sent() {
            assert_eq!(codec::code(frame), code::CHANGED);
        }
        let chunks = platform.saved_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[1].0, 256);
        assert_eq!(platform.finish_result(), Some(true));
    }

    #[test]
    fn test_corrupt_chunk_nacked_and_not_saved() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();
        transfer
            .handle_update_begin(None, &begin_message(256, 256, 0), &mut channel, &mut platform)
            .unwrap();

        // Corrupt the declared CRC.
        let mut message = chunk_message(&platform, 0, &[0x55; 16]);
        let len = message.len();
        message.buf_mut()[7] ^= 0xFF;
        message.set_len(len);

        transfer
            .handle_chunk(None, &message, &mut channel, &mut platform)
            .unwrap();

        assert_eq!(codec::code(channel.sent().last().unwrap()), code::BAD_REQUEST);
        assert!(platform.saved_chunks().is_empty());
        // The transfer itself survives a bad chunk; the cloud retransmits.
        assert!(transfer.in_progress());
    }

    #[test]
    fn test_chunk_without_begin_is_bad_request() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();

        transfer
            .handle_chunk(None, &chunk_message(&platform, 0, &[1, 2, 3]), &mut channel, &mut platform)
            .unwrap();

        assert_eq!(codec::code(&channel.sent()[0]), code::BAD_REQUEST);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();

        transfer
            .handle_update_begin(None, &begin_message(512, 0, 0), &mut channel, &mut platform)
            .unwrap();

        assert_eq!(codec::code(&channel.sent()[0]), code::BAD_REQUEST);
        assert!(!transfer.in_progress());
    }

    #[test]
    fn test_sink_refusal_answers_internal_server_error() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();
        platform.fail_prepare();

        transfer
            .handle_update_begin(None, &begin_message(512, 256, 0), &mut channel, &mut platform)
            .unwrap();

        assert_eq!(
            codec::code(&channel.sent()[0]),
            code::INTERNAL_SERVER_ERROR
        );
        assert!(!transfer.in_progress());
    }

    #[test]
    fn test_cancel_aborts_sink() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();
        transfer
            .handle_update_begin(None, &begin_message(512, 256, 0), &mut channel, &mut platform)
            .unwrap();

        transfer.cancel(&mut platform);

        assert!(!transfer.in_progress());
        assert_eq!(platform.finish_result(), Some(false));
    }

    #[test]
    fn test_stalled_transfer_cancelled_from_idle() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();
        transfer
            .handle_update_begin(None, &begin_message(512, 256, 0), &mut channel, &mut platform)
            .unwrap();

        let stall_deadline = platform.millis() + TRANSFER_STALL_TIMEOUT_MS;
        transfer.idle(stall_deadline, &mut platform);
        assert!(transfer.in_progress(), "not yet past the stall timeout");

        transfer.idle(stall_deadline + 1, &mut platform);
        assert!(!transfer.in_progress());
        assert_eq!(platform.finish_result(), Some(false));
    }

    #[test]
    fn test_update_done_without_transfer_is_bad_request() {
        let mut transfer = ChunkedTransfer::new();
        let mut channel = MockChannel::new();
        let mut platform = MockPlatform::new();

        transfer
            .handle_update_done(None, &done_message(), &mut channel, &mut platform)
            .unwrap();

        assert_eq!(codec::code(&channel.sent()[0]), code::BAD_REQUEST);
    }
}
