//! Describe document generation.
//!
//! The describe document enumerates what the device exposes: function keys,
//! variable keys with their type codes, system information, or (exclusively)
//! a binary metrics blob.  It is written straight into the channel's send
//! buffer through the [`Appender`] abstraction to avoid double-buffering on
//! constrained devices.
//!
//! Two appenders exist: [`BufferAppender`] writes into a borrowed slice and
//! records how many bytes did not fit, and [`SizeAppender`] only counts, so
//! callers can measure the current document without allocating.

use cloudlink_core::protocol::messages::{
    DescribeFlags, MAX_FUNCTION_KEY_LENGTH, MAX_VARIABLE_KEY_LENGTH,
};

use crate::application::descriptor::Descriptor;

/// Byte sink for document generation.
pub trait Appender {
    /// Appends raw bytes.  Implementations must account for every byte even
    /// when it does not fit.
    fn append(&mut self, bytes: &[u8]);

    fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }
}

/// Appender that writes into a borrowed buffer and tracks overflow.
pub struct BufferAppender<'a> {
    buf: &'a mut [u8],
    written: usize,
    overflow: usize,
}

impl<'a> BufferAppender<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            written: 0,
            overflow: 0,
        }
    }

    /// Bytes successfully written.
    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Number of bytes that did not fit, zero when everything fit.
    pub fn overflowed(&self) -> usize {
        self.overflow
    }
}

impl Appender for BufferAppender<'_> {
    fn append(&mut self, bytes: &[u8]) {
        let room = self.buf.len() - self.written;
        let fits = bytes.len().min(room);
        self.buf[self.written..self.written + fits].copy_from_slice(&bytes[..fits]);
        self.written += fits;
        self.overflow += bytes.len() - fits;
    }
}

/// Appender that discards data and only measures its size.
#[derive(Debug, Default)]
pub struct SizeAppender {
    size: usize,
}

impl SizeAppender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Appender for SizeAppender {
    fn append(&mut self, bytes: &[u8]) {
        self.size += bytes.len();
    }
}

/// Truncates a key to its emit limit.  Truncation is silent and happens on
/// emit, not on registration, so over-long keys simply appear shortened in
/// the document.
fn truncated(key: &str, max: usize) -> &[u8] {
    let bytes = key.as_bytes();
    &bytes[..bytes.len().min(max)]
}

/// Emits the describe document selected by `desc_flags` into `out`.
///
/// Metrics must be requested in isolation to produce the binary form; any
/// other combination produces the textual (JSON) document:
/// `{"f":[…],"v":{…},<system info>}`.
pub fn build_describe_message<D: Descriptor>(descriptor: &D, desc_flags: u8, out: &mut dyn Appender) {
    if desc_flags == DescribeFlags::METRICS && descriptor.supports_metrics() {
        // A leading null byte marks binary data; the next two bytes describe
        // the packet kind.
        out.append(&[0x00, DescribeFlags::METRICS, 0x00]);
        descriptor.append_metrics(out, 1 /* binary */, 0 /* page */);
        return;
    }

    out.append_str("{");
    let mut has_content = false;

    if desc_flags & DescribeFlags::APPLICATION != 0 {
        has_content = true;
        out.append_str("\"f\":[");
        for i in 0..descriptor.num_functions() {
            if i > 0 {
                out.append_byte(b',');
            }
            out.append_byte(b'"');
            out.append(truncated(descriptor.function_key(i), MAX_FUNCTION_KEY_LENGTH));
            out.append_byte(b'"');
        }
        out.append_str("],\"v\":{");
        for i in 0..descriptor.num_variables() {
            if i > 0 {
                out.append_byte(b',');
            }
            let key = descriptor.variable_key(i);
            let var_type = descriptor.variable_type(key);
            out.append_byte(b'"');
            out.append(truncated(key, MAX_VARIABLE_KEY_LENGTH));
            out.append_str("\":");
            out.append_byte(b'0' + var_type as u8);
        }
        out.append_byte(b'}');
    }

    if desc_flags & DescribeFlags::SYSTEM != 0 && descriptor.supports_system_info() {
        if has_content {
            out.append_byte(b',');
        }
        descriptor.append_system_info(out);
    }
    out.append_str("}");
}

/// Measures the current describe document for `desc_flags` without storing
/// it anywhere.
pub fn describe_size<D: Descriptor>(descriptor: &D, desc_flags: u8) -> usize {
    let mut appender = SizeAppender::new();
    build_describe_message(descriptor, desc_flags, &mut appender);
    appender.size()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
