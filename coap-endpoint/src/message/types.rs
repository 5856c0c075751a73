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

//! Scalar protocol types: message type, code, token and endpoint context.

use super::MessageError;
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;

pub const MAX_TOKEN_LENGTH: usize = 8;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MessageType::Confirmable => "CON",
            MessageType::NonConfirmable => "NON",
            MessageType::Acknowledgement => "ACK",
            MessageType::Reset => "RST",
        };
        f.write_str(label)
    }
}

/// Message code as `class.detail` packed into one byte.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Code(u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);
    pub const FETCH: Code = Code::new(0, 5);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const CONTINUE: Code = Code::new(2, 31);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1f))
    }

    pub const fn from_raw(raw: u8) -> Self {
        Code(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    pub fn is_response(self) -> bool {
        (2..=5).contains(&self.class())
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }

    /// Classes 1, 6 and 7 are reserved for non-request/response use (signals, future use).
    pub fn is_reserved(self) -> bool {
        matches!(self.class(), 1 | 6 | 7)
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl Debug for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Code({self})")
    }
}

/// Opaque request/response correlator, zero to eight bytes long.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, MessageError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_TOKEN_LENGTH {
            return Err(MessageError::TokenTooLong(bytes.len()));
        }
        Ok(Token(bytes))
    }

    pub fn empty() -> Self {
        Token(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&[u8]> for Token {
    type Error = MessageError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Token::new(bytes.to_vec())
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({self})")
    }
}

/// Addressing and security identity of a peer.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EndpointContext {
    peer: SocketAddr,
    principal: Option<String>,
    session_id: Option<Vec<u8>>,
}

impl EndpointContext {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            principal: None,
            session_id: None,
        }
    }

    pub fn secure(peer: SocketAddr, principal: impl Into<String>, session_id: Vec<u8>) -> Self {
        Self {
            peer,
            principal: Some(principal.into()),
            session_id: Some(session_id),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Whether a response arriving in `received` may answer a request sent to `self`.
    ///
    /// Addresses must be equal; when the request was bound to a secure session the
    /// response must arrive in the same session.
    pub fn matches_response_context(&self, received: &EndpointContext) -> bool {
        if self.peer != received.peer {
            return false;
        }
        match &self.session_id {
            Some(session_id) => received.session_id.as_ref() == Some(session_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn code_parts_and_display() {
        assert_eq!(Code::CONTENT.class(), 2);
        assert_eq!(Code::CONTENT.detail(), 5);
        assert_eq!(Code::CONTENT.raw(), 0x45);
        assert_eq!(Code::CONTENT.to_string(), "2.05");
        assert_eq!(Code::CONTINUE.to_string(), "2.31");
        assert!(Code::GET.is_request());
        assert!(!Code::EMPTY.is_request());
        assert!(Code::NOT_FOUND.is_response());
        assert!(!Code::NOT_FOUND.is_success());
        assert!(Code::from_raw(0xe1).is_reserved());
    }

    #[test]
    fn message_type_bits() {
        for message_type in [
            MessageType::Confirmable,
            MessageType::NonConfirmable,
            MessageType::Acknowledgement,
            MessageType::Reset,
        ] {
            assert_eq!(MessageType::from_bits(message_type.bits()), message_type);
        }
        assert_eq!(MessageType::Reset.to_string(), "RST");
    }

    #[test]
    fn token_rejects_more_than_eight_bytes() {
        assert!(Token::new(vec![0; 8]).is_ok());
        assert_eq!(
            Token::new(vec![0; 9]).expect_err("nine bytes should fail"),
            MessageError::TokenTooLong(9)
        );
        assert!(Token::empty().is_empty());
    }

    #[test]
    fn secure_context_requires_same_session() {
        let request_context = EndpointContext::secure(peer(5684), "client", vec![1, 2]);
        let same_session = EndpointContext::secure(peer(5684), "client", vec![1, 2]);
        let other_session = EndpointContext::secure(peer(5684), "client", vec![3]);

        assert!(request_context.matches_response_context(&same_session));
        assert!(!request_context.matches_response_context(&other_session));
        assert!(!request_context.matches_response_context(&EndpointContext::new(peer(5684))));
    }

    #[test]
    fn plain_context_matches_on_address() {
        let request_context = EndpointContext::new(peer(5683));

        assert!(request_context.matches_response_context(&EndpointContext::new(peer(5683))));
        assert!(!request_context.matches_response_context(&EndpointContext::new(peer(5684))));
    }
}
