//! Cloud-initiated function calls.
//!
//! A function call arrives as a tokened POST with the function key as the
//! second Uri-Path segment and the argument string as the payload.  The
//! handler acknowledges receipt immediately (application functions may run
//! long enough for the cloud to retransmit otherwise), then invokes the
//! registered function and sends a separate response bound to the request
//! token: a 2.05 Content with the 32-bit result, or 4.04 when no function
//! is registered under the key.
//!
//! The token-presence check happens in the dispatch engine before this
//! handler runs.

use cloudlink_core::protocol::messages::code;
use cloudlink_core::{codec, Message, Token};
use tracing::{info, warn};

use crate::application::channel::{Channel, ProtocolError};
use crate::application::descriptor::Descriptor;

/// Handles one function-call request.
///
/// # Errors
///
/// Returns a channel error when the acknowledgement or response cannot be
/// sent; application-level failures are reported to the cloud, not to the
/// caller.
pub fn handle_function_call<C: Channel, D: Descriptor>(
    token: Token,
    msg_id: u16,
    message: &Message,
    channel: &mut C,
    descriptor: &mut D,
) -> Result<(), ProtocolError> {
    let bytes = message.bytes();
    let key = codec::uri_path_segment(bytes, 1)
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .unwrap_or_default();
    let arg = String::from_utf8_lossy(codec::payload(bytes)).into_owned();

    let mut ack = channel.create()?;
    let len = codec::empty_ack(ack.buf_mut(), 0, 0)?;
    ack.set_len(len);
    ack.set_id(msg_id);
    channel.send(&mut ack)?;

    let result = if key.is_empty() {
        None
    } else {
        descriptor.call_function(&key, &arg)
    };

    let mut response = channel.create()?;
    let len = match result {
        Some(value) => {
            info!("function '{key}' returned {value}");
            let header =
                codec::coded_response(response.buf_mut(), 0, Some(token), code::CONTENT)?;
            codec::append_payload(response.buf_mut(), header, &value.to_be_bytes())?
        }
        None => {
            warn!("function call for unknown key '{key}'");
            codec::coded_response(response.buf_mut(), 0, Some(token), code::NOT_FOUND)?
        }
    };
    response.set_len(len);
    channel.send(&mut response)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::channel::mock::MockChannel;
    use crate::infrastructure::descriptor::mock::MockDescriptor;

    fn function_call_request(key: &str, arg: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x44, 0x02, 0x00, 0x07, 0xAA, 0xBB, 0xCC, 0xDD, 0xB1, b'f'];
        bytes.push(key.len() as u8); // second Uri-Path segment, delta 0
        bytes.extend_from_slice(key.as_bytes());
        if !arg.is_empty() {
            bytes.push(0xFF);
            bytes.extend_from_slice(arg);
        }
        bytes
    }

    #[test]
    fn test_known_function_acked_then_answered_with_result() {
        // Arrange
        let mut channel = MockChannel::new();
        let mut descriptor = MockDescriptor::new().with_function("led", 1);
        let request = Message::from_bytes(&function_call_request("led", b"on"), 256);

        // Act
        handle_function_call(0xAABBCCDD, 0x0007, &request, &mut channel, &mut descriptor)
            .unwrap();

        // Assert – first frame is the empty ACK echoing the request id.
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0], &[0x60, 0x00, 0x00, 0x07]);
        // Second frame is the tokened 2.05 response carrying the result.
        assert_eq!(codec::code(&sent[1]), code::CONTENT);
        assert_eq!(codec::token(&sent[1]).value(), Some(0xAABBCCDD));
        assert_eq!(codec::payload(&sent[1]), &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(descriptor.function_calls(), &[("led".to_string(), "on".to_string())]);
    }

    #[test]
    fn test_unknown_function_answers_not_found() {
        let mut channel = MockChannel::new();
        let mut descriptor = MockDescriptor::new();
        let request = Message::from_bytes(&function_call_request("nope", b""), 256);

        handle_function_call(0x01020304, 0x0007, &request, &mut channel, &mut descriptor)
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(codec::code(&sent[1]), code::NOT_FOUND);
        assert_eq!(codec::token(&sent[1]).value(), Some(0x01020304));
        assert!(codec::payload(&sent[1]).is_empty());
        assert!(descriptor.function_calls().is_empty());
    }

    #[test]
    fn test_missing_key_segment_answers_not_found_without_invoking() {
        let mut channel = MockChannel::new();
        let mut descriptor = MockDescriptor::new().with_function("led", 1);
        // Only the "f" segment, no function key.
        let request = Message::from_bytes(
            &[0x44, 0x02, 0x00, 0x07, 0xAA, 0xBB, 0xCC, 0xDD, 0xB1, b'f'],
            256,
        );

        handle_function_call(0xAABBCCDD, 0x0007, &request, &mut channel, &mut descriptor)
            .unwrap();

        assert_eq!(codec::code(&channel.sent()[1]), code::NOT_FOUND);
        assert!(descriptor.function_calls().is_empty());
    }

    #[test]
    fn test_empty_argument_passed_through() {
        let mut channel = MockChannel::new();
        let mut descriptor = MockDescriptor::new().with_function("reset", 0);
        let request = Message::from_bytes(&function_call_request("reset", b""), 256);

        handle_function_call(1, 2, &request, &mut channel, &mut descriptor).unwrap();

        assert_eq!(
            descriptor.function_calls(),
            &[("reset".to_string(), String::new())]
        );
    }
}
