//! Cloud-initiated variable reads.
//!
//! A variable request is a tokened GET with the variable key as the second
//! Uri-Path segment.  The handler acknowledges the request, reads the value
//! through the descriptor, and sends a separate tokened response with the
//! value encoded by type:
//!
//! | type | encoding |
//! |---|---|
//! | bool | 1 byte, `0`/`1` |
//! | int | 4 bytes, big-endian two's complement |
//! | double | 8 bytes, IEEE-754 big-endian |
//! | string | raw UTF-8 bytes |
//!
//! Unknown keys answer 4.04.  The token-presence check happens in the
//! dispatch engine before this handler runs.

use cloudlink_core::protocol::messages::code;
use cloudlink_core::{codec, Message, Token};
use tracing::warn;

use crate::application::channel::{Channel, ProtocolError};
use crate::application::descriptor::{Descriptor, VariableValue};

/// Handles one variable request.
///
/// # Errors
///
/// Returns a channel error when the acknowledgement or response cannot be
/// sent.
pub fn handle_request<C: Channel, D: Descriptor>(
    message: &Message,
    token: Token,
    msg_id: u16,
    channel: &mut C,
    descriptor: &mut D,
) -> Result<(), ProtocolError> {
    let bytes = message.bytes();
    let key = codec::uri_path_segment(bytes, 1)
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .unwrap_or_default();

    let mut ack = channel.create()?;
    let len = codec::empty_ack(ack.buf_mut(), 0, 0)?;
    ack.set_len(len);
    ack.set_id(msg_id);
    channel.send(&mut ack)?;

    let value = if key.is_empty() {
        None
    } else {
        descriptor.variable_value(&key)
    };

    let mut response = channel.create()?;
    let len = match value {
        Some(value) => {
            let header =
                codec::coded_response(response.buf_mut(), 0, Some(token), code::CONTENT)?;
            let body = encode_value(&value);
            codec::append_payload(response.buf_mut(), header, &body)?
        }
        None => {
            warn!("variable request for unknown key '{key}'");
            codec::coded_response(response.buf_mut(), 0, Some(token), code::NOT_FOUND)?
        }
    };
    response.set_len(len);
    channel.send(&mut response)
}

fn encode_value(value: &VariableValue) -> Vec<u8> {
    match value {
        VariableValue::Bool(b) => vec![u8::from(*b)],
        VariableValue::Int(i) => i.to_be_bytes().to_vec(),
        VariableValue::Double(d) => d.to_be_bytes().to_vec(),
        VariableValue::Str(s) => s.as_bytes().to_vec(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::channel::mock::MockChannel;
    use crate::infrastructure::descriptor::mock::MockDescriptor;

    fn variable_request(key: &str) -> Message {
        let mut bytes = vec![0x44, 0x01, 0x00, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0xB1, b'v'];
        bytes.push(key.len() as u8);
        bytes.extend_from_slice(key.as_bytes());
        Message::from_bytes(&bytes, 256)
    }

    fn respond(descriptor: &mut MockDescriptor, key: &str) -> Vec<Vec<u8>> {
        let mut channel = MockChannel::new();
        handle_request(
            &variable_request(key),
            0x0A0B0C0D,
            0x0009,
            &mut channel,
            descriptor,
        )
        .unwrap();
        channel.sent().to_vec()
    }

    #[test]
    fn test_int_variable_encoded_big_endian() {
        let mut descriptor =
            MockDescriptor::new().with_variable("count", VariableValue::Int(-2));
        let sent = respond(&mut descriptor, "count");
        assert_eq!(&sent[0], &[0x60, 0x00, 0x00, 0x09]);
        assert_eq!(codec::code(&sent[1]), code::CONTENT);
        assert_eq!(codec::payload(&sent[1]), &[0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn test_bool_variable_encoded_as_single_byte() {
        let mut descriptor =
            MockDescriptor::new().with_variable("armed", VariableValue::Bool(true));
        let sent = respond(&mut descriptor, "armed");
        assert_eq!(codec::payload(&sent[1]), &[0x01]);
    }

    #[test]
    fn test_double_variable_encoded_ieee754() {
        let mut descriptor =
            MockDescriptor::new().with_variable("temp", VariableValue::Double(21.5));
        let sent = respond(&mut descriptor, "temp");
        assert_eq!(codec::payload(&sent[1]), &21.5f64.to_be_bytes());
    }

    #[test]
    fn test_string_variable_encoded_utf8() {
        let mut descriptor = MockDescriptor::new()
            .with_variable("name", VariableValue::Str("porch".to_string()));
        let sent = respond(&mut descriptor, "name");
        assert_eq!(codec::payload(&sent[1]), b"porch");
    }

    #[test]
    fn test_unknown_variable_answers_not_found() {
        let mut descriptor = MockDescriptor::new();
        let sent = respond(&mut descriptor, "ghost");
        assert_eq!(codec::code(&sent[1]), code::NOT_FOUND);
        assert_eq!(codec::token(&sent[1]).value(), Some(0x0A0B0C0D));
    }

    #[test]
    fn test_response_binds_request_token() {
        let mut descriptor =
            MockDescriptor::new().with_variable("count", VariableValue::Int(7));
        let sent = respond(&mut descriptor, "count");
        assert_eq!(codec::token(&sent[1]).value(), Some(0x0A0B0C0D));
    }
}
