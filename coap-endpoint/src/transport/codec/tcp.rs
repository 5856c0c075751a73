//! RFC 8323 §3.2 stream framing: no type, no message ID.

use super::options::{read_options_and_payload, write_options_and_payload};
use super::{fill_parsed, MessageCodec, MessageFormatError, SerializeError};
use crate::message::{Code, EmptyMessage, Message, Request, Response, Token, MAX_TOKEN_LENGTH};

#[derive(Clone, Copy, Debug, Default)]
pub struct TcpCodec;

impl MessageCodec for TcpCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Message, MessageFormatError> {
        let first = *bytes
            .first()
            .ok_or_else(|| MessageFormatError::unreadable("empty frame"))?;
        let token_length = usize::from(first & 0x0f);
        if token_length > MAX_TOKEN_LENGTH {
            return Err(MessageFormatError::unreadable("token length above 8"));
        }

        let (body_length, extended) = read_length(first >> 4, &bytes[1..])?;
        let code_index = 1 + extended;
        let code = Code::from_raw(
            *bytes
                .get(code_index)
                .ok_or_else(|| MessageFormatError::unreadable("frame shorter than header"))?,
        );
        let token_start = code_index + 1;
        let body_start = token_start + token_length;
        if bytes.len() != body_start + body_length {
            return Err(MessageFormatError::unreadable("frame length mismatch"));
        }
        let token = Token::new(bytes[token_start..body_start].to_vec())
            .map_err(|err| MessageFormatError::unreadable(err.to_string()))?;
        let (options, payload) =
            read_options_and_payload(&bytes[body_start..]).map_err(MessageFormatError::unreadable)?;

        let message = if code.is_empty() {
            Message::Empty(EmptyMessage::inbound(None))
        } else if code.is_request() {
            Message::Request(Request::inbound(None, code))
        } else if code.is_response() {
            Message::Response(Response::inbound(None, code))
        } else {
            return Err(MessageFormatError::unreadable(format!(
                "signaling code {code} is not supported"
            )));
        };
        fill_parsed(message.core(), None, token, options, payload)
            .map_err(|err| MessageFormatError::unreadable(err.to_string()))?;
        Ok(message)
    }

    fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializeError> {
        let core = message.core();
        let token = core.token().unwrap_or_default();
        let payload = core.payload();
        let mut body = Vec::with_capacity(payload.len() + 16);
        core.with_options_ref(|options| write_options_and_payload(&mut body, options, &payload))?;

        let (length_nibble, extended) = length_header(body.len())?;
        let mut out = Vec::with_capacity(2 + extended.len() + token.len() + body.len());
        out.push((length_nibble << 4) | token.len() as u8);
        out.extend_from_slice(&extended);
        out.push(core.code().raw());
        out.extend_from_slice(token.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}

fn length_header(length: usize) -> Result<(u8, Vec<u8>), SerializeError> {
    if length < 13 {
        Ok((length as u8, Vec::new()))
    } else if length < 269 {
        Ok((13, vec![(length - 13) as u8]))
    } else if length < 65_805 {
        Ok((14, ((length - 269) as u16).to_be_bytes().to_vec()))
    } else {
        let extended =
            u32::try_from(length - 65_805).map_err(|_| SerializeError::MessageTooLarge(length))?;
        Ok((15, extended.to_be_bytes().to_vec()))
    }
}

fn read_length(nibble: u8, rest: &[u8]) -> Result<(usize, usize), MessageFormatError> {
    let truncated = || MessageFormatError::unreadable("truncated length field");
    match nibble {
        0..=12 => Ok((usize::from(nibble), 0)),
        13 => {
            let byte = *rest.first().ok_or_else(truncated)?;
            Ok((usize::from(byte) + 13, 1))
        }
        14 => {
            let pair = rest.get(..2).ok_or_else(truncated)?;
            Ok((usize::from(u16::from_be_bytes([pair[0], pair[1]])) + 269, 2))
        }
        _ => {
            let quad = rest.get(..4).ok_or_else(truncated)?;
            let value = u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]) as usize;
            Ok((value + 65_805, 4))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_type_and_mid() {
        let request = Request::get()
            .with_token(Token::new(vec![0x01, 0x02]).expect("valid token"))
            .with_uri_path("/a");

        let bytes = TcpCodec
            .serialize(&Message::Request(request))
            .expect("request should serialize");

        // Length 2 (one option of two bytes), token length 2.
        assert_eq!(bytes, vec![0x22, 0x01, 0x01, 0x02, 0xb1, b'a']);
    }

    #[test]
    fn parses_extended_length_frame() {
        let response = Response::new(Code::CONTENT).with_payload(vec![7_u8; 300]);
        let bytes = TcpCodec
            .serialize(&Message::Response(response))
            .expect("response should serialize");
        assert_eq!(bytes[0] >> 4, 14);

        let Message::Response(parsed) = TcpCodec.parse(&bytes).expect("frame should parse") else {
            panic!("expected a response");
        };
        assert_eq!(parsed.payload_len(), 300);
        assert_eq!(parsed.message_type(), None);
        assert_eq!(parsed.mid(), None);
    }

    #[test]
    fn truncated_frame_is_unreadable() {
        let err = TcpCodec.parse(&[0x30, 0x45, 0xff]).expect_err("short body must fail");
        assert!(!err.is_rejectable());
    }

    #[test]
    fn signaling_codes_are_rejected() {
        assert!(TcpCodec.parse(&[0x00, 0xe1]).is_err());
    }
}
