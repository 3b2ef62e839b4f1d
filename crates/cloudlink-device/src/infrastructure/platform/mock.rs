//! Mock platform with a manually advanced clock.
//!
//! Tests control time explicitly through [`MockPlatform::advance`], which
//! is what makes the ack-registry and keepalive deadline tests
//! deterministic.  The CRC is a real CRC-32 so checksum comparisons behave
//! like production, and the RNG is a fixed-seed generator so token
//! sequences are reproducible.

use std::cell::Cell;

use crate::application::channel::ProtocolError;
use crate::application::platform::{FirmwareInfo, Platform};

/// A mock implementation of [`Platform`] that records every callback.
pub struct MockPlatform {
    now: Cell<u64>,
    auto_advance_ms: u64,
    rng_state: u32,
    time_sets: Vec<u32>,
    signals: Vec<(bool, u16)>,
    prepared: Option<FirmwareInfo>,
    saved_chunks: Vec<(u32, Vec<u8>)>,
    finish_result: Option<bool>,
    fail_prepare: bool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            now: Cell::new(1_000),
            auto_advance_ms: 0,
            rng_state: 0x2F6E_2B1C,
            time_sets: Vec::new(),
            signals: Vec::new(),
            prepared: None,
            saved_chunks: Vec::new(),
            finish_result: None,
            fail_prepare: false,
        }
    }

    /// Advances the manual clock.
    pub fn advance(&mut self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    /// Makes every `millis()` reading advance the clock by `ms`, for tests
    /// that need wall-clock bounds to expire inside a polling loop.
    pub fn set_auto_advance(&mut self, ms: u64) {
        self.auto_advance_ms = ms;
    }

    /// Epochs applied via `set_time`, oldest first.
    pub fn time_sets(&self) -> &[u32] {
        &self.time_sets
    }

    /// Signal transitions, oldest first.
    pub fn signals(&self) -> &[(bool, u16)] {
        &self.signals
    }

    /// The geometry of the last prepared firmware transfer.
    pub fn prepared(&self) -> Option<FirmwareInfo> {
        self.prepared
    }

    /// Chunks written to the sink as `(offset, data)` pairs.
    pub fn saved_chunks(&self) -> &[(u32, Vec<u8>)] {
        &self.saved_chunks
    }

    /// The `successful` argument of the last `finish_firmware_update`.
    pub fn finish_result(&self) -> Option<bool> {
        self.finish_result
    }

    /// Makes the next `prepare_firmware_update` fail.
    pub fn fail_prepare(&mut self) {
        self.fail_prepare = true;
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MockPlatform {
    fn millis(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.auto_advance_ms);
        now
    }

    fn set_time(&mut self, epoch: u32) {
        self.time_sets.push(epoch);
    }

    fn calculate_crc(&self, data: &[u8]) -> u32 {
        // Bitwise CRC-32 (IEEE, reflected); slow but dependency-free, and
        // only test fixtures run it.
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    fn signal(&mut self, on: bool, group: u16) {
        self.signals.push((on, group));
    }

    fn fill_random(&mut self, dest: &mut [u8]) {
        for byte in dest {
            // xorshift32 keeps the sequence well distributed and repeatable.
            self.rng_state ^= self.rng_state << 13;
            self.rng_state ^= self.rng_state >> 17;
            self.rng_state ^= self.rng_state << 5;
            *byte = self.rng_state as u8;
        }
    }

    fn prepare_firmware_update(&mut self, info: &FirmwareInfo) -> Result<(), ProtocolError> {
        if self.fail_prepare {
            self.fail_prepare = false;
            return Err(ProtocolError::FirmwareUpdate("no space".to_string()));
        }
        self.prepared = Some(*info);
        self.saved_chunks.clear();
        self.finish_result = None;
        Ok(())
    }

    fn save_firmware_chunk(&mut self, offset: u32, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.saved_chunks.push((offset, chunk.to_vec()));
        Ok(())
    }

    fn finish_firmware_update(&mut self, successful: bool) -> Result<(), ProtocolError> {
        self.finish_result = Some(successful);
        Ok(())
    }
}
