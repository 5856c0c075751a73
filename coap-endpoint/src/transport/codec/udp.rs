/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! RFC 7252 §3 datagram format.

use super::options::{read_options_and_payload, write_options_and_payload};
use super::{fill_parsed, MessageCodec, MessageFormatError, SerializeError};
use crate::message::{
    Code, EmptyMessage, Message, MessageType, Request, Response, Token, MAX_TOKEN_LENGTH,
};

const VERSION: u8 = 1;
const HEADER_LENGTH: usize = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct UdpCodec;

impl MessageCodec for UdpCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Message, MessageFormatError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(MessageFormatError::unreadable("datagram shorter than header"));
        }
        if bytes[0] >> 6 != VERSION {
            return Err(MessageFormatError::unreadable("unsupported protocol version"));
        }

        let message_type = MessageType::from_bits(bytes[0] >> 4);
        let token_length = usize::from(bytes[0] & 0x0f);
        let code = Code::from_raw(bytes[1]);
        let mid = u16::from_be_bytes([bytes[2], bytes[3]]);
        let confirmable = message_type == MessageType::Confirmable;
        let framed = |reason: String| MessageFormatError::framed(mid, confirmable, reason);

        if token_length > MAX_TOKEN_LENGTH {
            return Err(framed(format!("token length {token_length} above {MAX_TOKEN_LENGTH}")));
        }
        let body_start = HEADER_LENGTH + token_length;
        if bytes.len() < body_start {
            return Err(framed("token exceeds datagram".to_string()));
        }
        let token = Token::new(bytes[HEADER_LENGTH..body_start].to_vec())
            .map_err(|err| framed(err.to_string()))?;

        if code.is_empty() {
            if token_length != 0 || bytes.len() > HEADER_LENGTH {
                return Err(framed("empty message with token or content".to_string()));
            }
            let empty = EmptyMessage::inbound(Some(message_type));
            fill_parsed(&empty, Some(mid), token, Default::default(), Vec::new())
                .map_err(|err| framed(err.to_string()))?;
            return Ok(Message::Empty(empty));
        }

        let (options, payload) = read_options_and_payload(&bytes[body_start..]).map_err(framed)?;

        let message = if code.is_request() {
            Message::Request(Request::inbound(Some(message_type), code))
        } else if code.is_response() {
            Message::Response(Response::inbound(Some(message_type), code))
        } else {
            return Err(framed(format!("code {code} is not a request or response")));
        };
        fill_parsed(message.core(), Some(mid), token, options, payload)
            .map_err(|err| framed(err.to_string()))?;
        Ok(message)
    }

    fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializeError> {
        let core = message.core();
        let message_type = core.message_type().ok_or(SerializeError::MissingType)?;
        let mid = core.mid().ok_or(SerializeError::MissingMid)?;
        let token = core.token().unwrap_or_default();
        let payload = core.payload();

        let mut out = Vec::with_capacity(HEADER_LENGTH + token.len() + payload.len() + 16);
        out.push((VERSION << 6) | (message_type.bits() << 4) | token.len() as u8);
        out.push(core.code().raw());
        out.extend_from_slice(&mid.to_be_bytes());
        out.extend_from_slice(token.as_bytes());
        core.with_options_ref(|options| write_options_and_payload(&mut out, options, &payload))?;
        Ok(out)
    }
}
