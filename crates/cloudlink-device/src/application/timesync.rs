//! Time synchronisation bookkeeping.
//!
//! The device has no battery-backed clock; it asks the cloud for the wall
//! time after connecting and whenever the application requests a re-sync.
//! This component records request/answer timing and applies the received
//! epoch through the platform's `set_time` callback.

use crate::application::platform::Platform;

/// Tracks the state of the time-sync sub-protocol.
#[derive(Debug, Default)]
pub struct TimeSync {
    request_millis: Option<u64>,
    synced_millis: Option<u64>,
    last_epoch: Option<u32>,
}

impl TimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets any in-flight request; called at session start.
    pub fn reset(&mut self) {
        self.request_millis = None;
    }

    /// Records that a time request left the device at `now`.
    pub fn request_sent(&mut self, now: u64) {
        self.request_millis = Some(now);
    }

    /// `true` while a request is awaiting its answer.
    pub fn in_progress(&self) -> bool {
        self.request_millis.is_some()
    }

    /// Applies a time answer from the cloud.
    pub fn handle_time_response<P: Platform>(&mut self, epoch: u32, now: u64, platform: &mut P) {
        platform.set_time(epoch);
        self.request_millis = None;
        self.synced_millis = Some(now);
        self.last_epoch = Some(epoch);
    }

    /// The last applied epoch and the local time it arrived, if any.
    pub fn last_sync(&self) -> Option<(u32, u64)> {
        match (self.last_epoch, self.synced_millis) {
            (Some(epoch), Some(at)) => Some((epoch, at)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel::ProtocolError;
    use crate::application::platform::FirmwareInfo;

    #[derive(Default)]
    struct ClockSink {
        applied: Vec<u32>,
    }

    impl Platform for ClockSink {
        fn millis(&self) -> u64 {
            0
        }
        fn set_time(&mut self, epoch: u32) {
            self.applied.push(epoch);
        }
        fn calculate_crc(&self, _data: &[u8]) -> u32 {
            0
        }
        fn signal(&mut self, _on: bool, _group: u16) {}
        fn fill_random(&mut self, _dest: &mut [u8]) {}
        fn prepare_firmware_update(&mut self, _info: &FirmwareInfo) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn save_firmware_chunk(&mut self, _offset: u32, _chunk: &[u8]) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn finish_firmware_update(&mut self, _successful: bool) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[test]
    fn test_response_applies_epoch_and_records_sync() {
        let mut timesync = TimeSync::new();
        let mut platform = ClockSink::default();

        timesync.request_sent(1_000);
        assert!(timesync.in_progress());

        timesync.handle_time_response(0x5E00_0000, 1_250, &mut platform);

        assert_eq!(platform.applied, vec![0x5E00_0000]);
        assert!(!timesync.in_progress());
        assert_eq!(timesync.last_sync(), Some((0x5E00_0000, 1_250)));
    }

    #[test]
    fn test_unsolicited_response_still_applies_time() {
        // The cloud may push time without a request; the device takes it.
        let mut timesync = TimeSync::new();
        let mut platform = ClockSink::default();
        timesync.handle_time_response(1234, 10, &mut platform);
        assert_eq!(platform.applied, vec![1234]);
    }

    #[test]
    fn test_reset_clears_in_flight_request() {
        let mut timesync = TimeSync::new();
        timesync.request_sent(5);
        timesync.reset();
        assert!(!timesync.in_progress());
    }
}
