//! The platform port: everything the engine needs from the surrounding
//! firmware.
//!
//! All callbacks are synchronous and cheap; the clock is the only thing the
//! engine polls on every event-loop turn.

use crate::application::channel::ProtocolError;

/// Geometry of an announced firmware transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Total file size in bytes.
    pub file_size: u32,
    /// Size of each chunk except possibly the last.
    pub chunk_size: u16,
    /// CRC of the complete file, verified by the sink on finish.
    pub file_crc: u32,
}

/// Services injected from the platform/HAL layer.
pub trait Platform {
    /// Monotonic milliseconds since boot.  Drives all deadline accounting.
    fn millis(&self) -> u64;

    /// Applies a wall-clock time received from the cloud (Unix epoch,
    /// seconds).
    fn set_time(&mut self, epoch: u32);

    /// CRC used for describe documents, subscriptions, and firmware chunks.
    /// Must match the cloud's parameterisation.
    fn calculate_crc(&self, data: &[u8]) -> u32;

    /// Visual/physical signal requested by the cloud (device rave mode).
    fn signal(&mut self, on: bool, group: u16);

    /// Fills `dest` with random bytes; used once at init to seed the token
    /// counter.
    fn fill_random(&mut self, dest: &mut [u8]);

    /// Prepares the firmware sink for an incoming transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FirmwareUpdate`] when storage cannot be
    /// prepared.
    fn prepare_firmware_update(&mut self, info: &FirmwareInfo) -> Result<(), ProtocolError>;

    /// Writes one verified chunk at the given byte offset.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FirmwareUpdate`] when the write fails.
    fn save_firmware_chunk(&mut self, offset: u32, chunk: &[u8]) -> Result<(), ProtocolError>;

    /// Finalises the transfer.  `successful` is `false` when the transfer
    /// was cancelled and the sink should discard partial data.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FirmwareUpdate`] when finalisation fails.
    fn finish_firmware_update(&mut self, successful: bool) -> Result<(), ProtocolError>;
}
