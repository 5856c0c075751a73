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

//! Wire codecs: RFC 7252 datagrams and RFC 8323 stream frames.

mod options;
mod tcp;
mod udp;

pub use tcp::TcpCodec;
pub use udp::UdpCodec;

use super::Protocol;
use crate::message::{Message, MessageCore, MessageError, OptionSet, Token};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub trait MessageCodec: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Message, MessageFormatError>;

    fn serialize(&self, message: &Message) -> Result<Vec<u8>, SerializeError>;
}

/// Codec matching the framing of `protocol`.
pub fn codec_for(protocol: Protocol) -> Arc<dyn MessageCodec> {
    if protocol.is_reliable() {
        Arc::new(TcpCodec)
    } else {
        Arc::new(UdpCodec)
    }
}

/// Malformed inbound bytes.
///
/// When the header could still be read, `mid` and `confirmable` describe it so
/// the inbox can answer a malformed confirmable message with a reset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageFormatError {
    mid: Option<u16>,
    confirmable: bool,
    reason: String,
}

impl MessageFormatError {
    pub(crate) fn unreadable(reason: impl Into<String>) -> Self {
        Self {
            mid: None,
            confirmable: false,
            reason: reason.into(),
        }
    }

    pub(crate) fn framed(mid: u16, confirmable: bool, reason: impl Into<String>) -> Self {
        Self {
            mid: Some(mid),
            confirmable,
            reason: reason.into(),
        }
    }

    pub fn mid(&self) -> Option<u16> {
        self.mid
    }

    pub fn is_confirmable(&self) -> bool {
        self.confirmable
    }

    /// Confirmable with a readable message ID: the sender expects a reply.
    pub fn is_rejectable(&self) -> bool {
        self.confirmable && self.mid.is_some()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Display for MessageFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.mid {
            Some(mid) => write!(f, "malformed message (mid {mid}): {}", self.reason),
            None => write!(f, "malformed message: {}", self.reason),
        }
    }
}

impl Error for MessageFormatError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SerializeError {
    MissingType,
    MissingMid,
    OptionTooLong(u16),
    MessageTooLarge(usize),
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializeError::MissingType => write!(f, "message type is not set"),
            SerializeError::MissingMid => write!(f, "message ID is not set"),
            SerializeError::OptionTooLong(number) => write!(f, "value of option {number} is too long"),
            SerializeError::MessageTooLarge(size) => write!(f, "message of {size} bytes is too large"),
        }
    }
}

impl Error for SerializeError {}

/// Copies decoded header and body fields into a freshly parsed message.
fn fill_parsed(
    core: &MessageCore,
    mid: Option<u16>,
    token: Token,
    options: OptionSet,
    payload: Vec<u8>,
) -> Result<(), MessageError> {
    if let Some(mid) = mid {
        core.set_mid(mid)?;
    }
    core.set_token(token)?;
    core.set_options(options)?;
    core.set_payload(payload)
}
