//! Pure decode/build functions for the CloudLink wire format.
//!
//! Wire format:
//! ```text
//! [ver:2 type:2 tkl:4][code:1][message_id:2] [token:0|4] [options…] [0xFF payload…]
//! ```
//! All multi-byte integers are big-endian.  Options are encoded as
//! delta/length nibble pairs with the standard 13/14 extension bytes and are
//! terminated by the `0xFF` payload marker.
//!
//! Decoders are pure functions over byte slices and never allocate; the
//! handful of builders write the exact messages a device originates.  The
//! fixed-header accessors ([`wire_type`], [`code`], [`message_id`]) assume
//! the caller has already verified that the slice holds at least
//! [`HEADER_SIZE`] bytes, which the dispatch engine does before decoding.

use thiserror::Error;

use crate::protocol::messages::{
    code, option, HelloPayload, MessageType, WireType, HEADER_SIZE, MAX_EVENT_NAME_LENGTH,
    PROTOCOL_VERSION, TOKEN_SIZE, Token,
};

/// Marker byte separating the option list from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// First header byte of an outgoing confirmable message without a token.
const CON_NO_TOKEN: u8 = (PROTOCOL_VERSION << 6) | ((WireType::Con as u8) << 4);
/// First header byte of an outgoing non-confirmable message without a token.
const NON_NO_TOKEN: u8 = (PROTOCOL_VERSION << 6) | ((WireType::Non as u8) << 4);
/// First header byte of an outgoing acknowledgement without a token.
const ACK_NO_TOKEN: u8 = (PROTOCOL_VERSION << 6) | ((WireType::Ack as u8) << 4);

/// Errors that can occur while building a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The target buffer is shorter than the encoded message.
    #[error("buffer too small: need {needed} bytes, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// A value does not fit the option encoding this builder supports.
    #[error("value too long for option encoding: {length} bytes")]
    ValueTooLong { length: usize },
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::BufferTooSmall {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ── Header decoders ───────────────────────────────────────────────────────────

/// Returns the protocol version bits of the header.
pub fn version(buf: &[u8]) -> u8 {
    buf[0] >> 6
}

/// Returns the wire type (CON/NON/ACK/RESET) of the header.
pub fn wire_type(buf: &[u8]) -> WireType {
    WireType::from_header(buf[0])
}

/// Returns the code byte of the header.  Split it with [`code::class`] and
/// [`code::detail`].
pub fn code(buf: &[u8]) -> u8 {
    buf[1]
}

/// Returns the 16-bit message id of the header.
pub fn message_id(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[2], buf[3]])
}

// ── Token ─────────────────────────────────────────────────────────────────────

/// Result of decoding the token field.
///
/// This system uses tokens of exactly [`TOKEN_SIZE`] bytes.  Any other
/// non-zero length is *not* a reason to reject the message: the caller logs
/// it and continues with no token, matching the wire contract's leniency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecode {
    /// Token length zero.
    Absent,
    /// A well-formed 4-byte token.
    Present(Token),
    /// A token length this system does not use; treat as absent.
    UnsupportedLength(usize),
}

impl TokenDecode {
    /// Collapses the leniency rule: a usable token or nothing.
    pub fn value(self) -> Option<Token> {
        match self {
            TokenDecode::Present(token) => Some(token),
            _ => None,
        }
    }
}

/// Decodes the token field of a received message.
pub fn token(buf: &[u8]) -> TokenDecode {
    let token_len = (buf[0] & 0x0F) as usize;
    if token_len == 0 {
        return TokenDecode::Absent;
    }
    if token_len != TOKEN_SIZE || buf.len() < HEADER_SIZE + TOKEN_SIZE {
        return TokenDecode::UnsupportedLength(token_len);
    }
    TokenDecode::Present(Token::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]))
}

// ── Option walker ─────────────────────────────────────────────────────────────

/// Iterator over the `(option number, value)` pairs of a message.
///
/// Stops at the payload marker, at the end of the buffer, or at the first
/// malformed option.  After exhaustion the cursor rests on the payload
/// marker if one was found, which [`payload`] relies on.
pub struct Options<'a> {
    buf: &'a [u8],
    pos: usize,
    number: u16,
    done: bool,
}

impl<'a> Options<'a> {
    fn decode_extended(&mut self, nibble: u16) -> Option<u16> {
        match nibble {
            13 => {
                let byte = *self.buf.get(self.pos)?;
                self.pos += 1;
                Some(13 + byte as u16)
            }
            14 => {
                let bytes = self.buf.get(self.pos..self.pos + 2)?;
                self.pos += 2;
                269u16.checked_add(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            15 => None, // reserved; only valid as part of the payload marker
            n => Some(n),
        }
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            return None;
        }
        let byte = self.buf[self.pos];
        if byte == PAYLOAD_MARKER {
            self.done = true;
            return None;
        }
        self.pos += 1;
        let (delta, length) = match (
            self.decode_extended((byte >> 4) as u16),
            self.decode_extended((byte & 0x0F) as u16),
        ) {
            (Some(delta), Some(length)) => (delta, length as usize),
            _ => {
                self.done = true;
                return None;
            }
        };
        self.number = match self.number.checked_add(delta) {
            Some(number) => number,
            None => {
                self.done = true;
                return None;
            }
        };
        let start = self.pos;
        let end = start + length;
        if end > self.buf.len() {
            self.done = true;
            return None;
        }
        self.pos = end;
        Some((self.number, &self.buf[start..end]))
    }
}

/// Returns an iterator over the options of a received message.
pub fn options(buf: &[u8]) -> Options<'_> {
    let token_len = if buf.is_empty() {
        0
    } else {
        // Tokens longer than 8 bytes cannot occur in a well-formed header.
        ((buf[0] & 0x0F) as usize).min(8)
    };
    Options {
        buf,
        pos: HEADER_SIZE + token_len,
        number: 0,
        done: false,
    }
}

/// Returns the payload of a received message (empty if there is none).
pub fn payload(buf: &[u8]) -> &[u8] {
    let mut opts = options(buf);
    for _ in opts.by_ref() {}
    let pos = opts.pos;
    if pos < buf.len() && buf[pos] == PAYLOAD_MARKER {
        &buf[pos + 1..]
    } else {
        &[]
    }
}

/// Returns the value of the first Uri-Query option, if any.
pub fn uri_query_byte(buf: &[u8]) -> Option<u8> {
    options(buf)
        .find(|(number, _)| *number == option::URI_QUERY)
        .and_then(|(_, value)| value.first().copied())
}

/// Returns the `index`-th Uri-Path segment, if present.
pub fn uri_path_segment(buf: &[u8], index: usize) -> Option<&[u8]> {
    options(buf)
        .filter(|(number, _)| *number == option::URI_PATH)
        .nth(index)
        .map(|(_, value)| value)
}

/// Extracts the event name from an event message: all Uri-Path segments
/// after the leading operation character, joined with `/`.
pub fn event_name(buf: &[u8]) -> Option<String> {
    let mut name = String::new();
    let mut found = false;
    for (_, value) in options(buf)
        .filter(|(number, _)| *number == option::URI_PATH)
        .skip(1)
    {
        if found {
            name.push('/');
        }
        name.push_str(&String::from_utf8_lossy(value));
        found = true;
    }
    found.then_some(name)
}

// ── Message classification ────────────────────────────────────────────────────

/// Classifies a received message into the operation the engine dispatches on.
///
/// Requests are identified by their first Uri-Path character:
///
/// | path | code | type |
/// |---|---|---|
/// | `d` | any | describe |
/// | `f` | any | function call |
/// | `v` | any | variable request |
/// | `e`/`E` | any | event |
/// | `h` | any | hello |
/// | `k` | any | key change |
/// | `c` | any | chunk |
/// | `u` | POST / PUT | update begin / update done |
/// | `s` | POST | save begin |
/// | `s` | PUT | signal start/stop (Uri-Query byte `0` stops) |
///
/// An empty confirmable message is a ping.  A 2.05 Content reply is the
/// cloud's time answer, the only success response consumed by content.
/// Anything else recognisably wrong yields [`MessageType::Error`]; anything
/// to be ignored yields [`MessageType::None`].
pub fn message_type(buf: &[u8]) -> MessageType {
    if buf.len() < HEADER_SIZE {
        return MessageType::None;
    }
    let code_byte = code(buf);
    if code_byte == code::EMPTY {
        return if wire_type(buf) == WireType::Con {
            MessageType::Ping
        } else {
            MessageType::None
        };
    }
    match code::class(code_byte) {
        0 => {}
        2 => {
            return if code_byte == code::CONTENT {
                MessageType::Time
            } else {
                MessageType::None
            };
        }
        _ => return MessageType::Error,
    }

    let mut first_path = None;
    let mut query = None;
    for (number, value) in options(buf) {
        match number {
            option::URI_PATH if first_path.is_none() => first_path = value.first().copied(),
            option::URI_QUERY if query.is_none() => query = value.first().copied(),
            _ => {}
        }
    }
    let Some(path) = first_path else {
        return MessageType::None;
    };
    match path {
        b'd' => MessageType::Describe,
        b'f' => MessageType::FunctionCall,
        b'v' => MessageType::VariableRequest,
        b'e' | b'E' => MessageType::Event,
        b'h' => MessageType::Hello,
        b'k' => MessageType::KeyChange,
        b'c' => MessageType::Chunk,
        b'u' => {
            if code_byte == code::PUT {
                MessageType::UpdateDone
            } else {
                MessageType::UpdateBegin
            }
        }
        b's' => {
            if code_byte == code::PUT {
                match query {
                    Some(0) => MessageType::SignalStop,
                    _ => MessageType::SignalStart,
                }
            } else {
                MessageType::SaveBegin
            }
        }
        b't' => MessageType::Time,
        _ => MessageType::Error,
    }
}

/// Reads the epoch from the cloud's time answer.
///
/// The epoch sits at a fixed offset from the start of the message (header,
/// short token, payload marker), as established by the original wire
/// contract for time responses.
pub fn time_epoch(buf: &[u8]) -> Option<u32> {
    let bytes = buf.get(6..10)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── Builders ──────────────────────────────────────────────────────────────────

/// Writes an empty acknowledgement echoing the given message-id bytes.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` cannot hold 4 bytes.
pub fn empty_ack(buf: &mut [u8], id_hi: u8, id_lo: u8) -> Result<usize, CodecError> {
    ensure(buf, 4)?;
    buf[0] = ACK_NO_TOKEN;
    buf[1] = code::EMPTY;
    buf[2] = id_hi;
    buf[3] = id_lo;
    Ok(4)
}

/// Writes an acknowledgement carrying a response code, echoing the given
/// message-id bytes and binding the request token when one is present.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn coded_ack(
    buf: &mut [u8],
    token: Option<Token>,
    code_byte: u8,
    id_hi: u8,
    id_lo: u8,
) -> Result<usize, CodecError> {
    let token_len = if token.is_some() { TOKEN_SIZE } else { 0 };
    ensure(buf, HEADER_SIZE + token_len)?;
    buf[0] = ACK_NO_TOKEN | token_len as u8;
    buf[1] = code_byte;
    buf[2] = id_hi;
    buf[3] = id_lo;
    if let Some(token) = token {
        buf[4..8].copy_from_slice(&token.to_be_bytes());
    }
    Ok(HEADER_SIZE + token_len)
}

/// Writes an empty confirmable message, used as the keepalive ping.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` cannot hold 4 bytes.
pub fn ping(buf: &mut [u8], msg_id: u16) -> Result<usize, CodecError> {
    ensure(buf, 4)?;
    buf[0] = CON_NO_TOKEN;
    buf[1] = code::EMPTY;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    Ok(4)
}

/// Writes the header of a device-initiated describe POST: confirmable,
/// tokened, Uri-Path `d`, a single Uri-Query byte carrying the describe
/// flags, and the payload marker.  The document body is appended directly
/// after the returned length.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn describe_post_header(
    buf: &mut [u8],
    msg_id: u16,
    token: Token,
    desc_flags: u8,
) -> Result<usize, CodecError> {
    ensure(buf, 13)?;
    buf[0] = CON_NO_TOKEN | TOKEN_SIZE as u8;
    buf[1] = code::POST;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    buf[4..8].copy_from_slice(&token.to_be_bytes());
    buf[8] = 0xB1; // Uri-Path (11), length 1
    buf[9] = b'd';
    buf[10] = 0x41; // Uri-Query (delta 4), length 1
    buf[11] = desc_flags;
    buf[12] = PAYLOAD_MARKER;
    Ok(13)
}

/// Writes a separate response bound to a request token, carrying the given
/// response code and no payload.  Append a body with [`append_payload`].
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn coded_response(
    buf: &mut [u8],
    msg_id: u16,
    token: Option<Token>,
    code_byte: u8,
) -> Result<usize, CodecError> {
    let token_len = if token.is_some() { TOKEN_SIZE } else { 0 };
    let needed = HEADER_SIZE + token_len;
    ensure(buf, needed)?;
    buf[0] = CON_NO_TOKEN | token_len as u8;
    buf[1] = code_byte;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    if let Some(token) = token {
        buf[4..8].copy_from_slice(&token.to_be_bytes());
    }
    Ok(needed)
}

/// Appends the payload marker and `body` to a message ending at `offset`,
/// returning the new total length.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` cannot hold the body.
pub fn append_payload(buf: &mut [u8], offset: usize, body: &[u8]) -> Result<usize, CodecError> {
    let needed = offset + 1 + body.len();
    ensure(buf, needed)?;
    buf[offset] = PAYLOAD_MARKER;
    buf[offset + 1..needed].copy_from_slice(body);
    Ok(needed)
}

/// Writes the header of the separate describe response: a confirmable 2.05
/// Content message echoing the request token, ending with the payload
/// marker so the document body can be appended directly.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn description_response(
    buf: &mut [u8],
    msg_id: u16,
    token: Option<Token>,
) -> Result<usize, CodecError> {
    let header = coded_response(buf, msg_id, token, code::CONTENT)?;
    ensure(buf, header + 1)?;
    buf[header] = PAYLOAD_MARKER;
    Ok(header + 1)
}

/// Writes the complete HELLO message: a confirmable POST with Uri-Path `h`
/// and the device identity payload.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn hello(buf: &mut [u8], msg_id: u16, payload: &HelloPayload) -> Result<usize, CodecError> {
    ensure(buf, 27)?;
    buf[0] = CON_NO_TOKEN;
    buf[1] = code::POST;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    buf[4] = 0xB1; // Uri-Path (11), length 1
    buf[5] = b'h';
    buf[6] = PAYLOAD_MARKER;
    buf[7..9].copy_from_slice(&payload.product_id.to_be_bytes());
    buf[9..11].copy_from_slice(&payload.firmware_version.to_be_bytes());
    buf[11] = 0; // reserved
    buf[12] = payload.flags.0;
    buf[13..15].copy_from_slice(&payload.platform_id.to_be_bytes());
    buf[15..27].copy_from_slice(&payload.device_id);
    Ok(27)
}

/// Writes a tokened time request: a confirmable GET with Uri-Path `t`.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if `buf` is too short.
pub fn time_request(buf: &mut [u8], msg_id: u16, token: Token) -> Result<usize, CodecError> {
    ensure(buf, 10)?;
    buf[0] = CON_NO_TOKEN | TOKEN_SIZE as u8;
    buf[1] = code::GET;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    buf[4..8].copy_from_slice(&token.to_be_bytes());
    buf[8] = 0xB1; // Uri-Path (11), length 1
    buf[9] = b't';
    Ok(10)
}

/// Writes the header of an outbound event POST: Uri-Path `e` followed by the
/// event name as a second path segment.  The caller appends the payload
/// marker and event data when there is any.
///
/// # Errors
///
/// Returns [`CodecError::ValueTooLong`] if the event name exceeds
/// [`MAX_EVENT_NAME_LENGTH`], or [`CodecError::BufferTooSmall`] if `buf` is
/// too short.
pub fn event_post_header(
    buf: &mut [u8],
    msg_id: u16,
    name: &str,
    confirmable: bool,
) -> Result<usize, CodecError> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() > MAX_EVENT_NAME_LENGTH {
        return Err(CodecError::ValueTooLong {
            length: name_bytes.len(),
        });
    }
    // Second Uri-Path segment: delta 0, length nibble with a 13-extension
    // byte for names of 13 bytes or more.
    let name_header_len = if name_bytes.len() < 13 { 1 } else { 2 };
    let needed = 6 + name_header_len + name_bytes.len();
    ensure(buf, needed)?;
    buf[0] = if confirmable { CON_NO_TOKEN } else { NON_NO_TOKEN };
    buf[1] = code::POST;
    buf[2..4].copy_from_slice(&msg_id.to_be_bytes());
    buf[4] = 0xB1; // Uri-Path (11), length 1
    buf[5] = b'e';
    let mut pos = 6;
    if name_bytes.len() < 13 {
        buf[pos] = name_bytes.len() as u8;
        pos += 1;
    } else {
        buf[pos] = 0x0D;
        buf[pos + 1] = (name_bytes.len() - 13) as u8;
        pos += 2;
    }
    buf[pos..pos + name_bytes.len()].copy_from_slice(name_bytes);
    Ok(pos + name_bytes.len())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
