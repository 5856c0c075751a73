//! Registry keys and identifier generators.

use crate::message::{MessageCore, Token, MAX_TOKEN_LENGTH};
use rand::RngCore;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};

/// Message ID scoped to the peer it was exchanged with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct KeyMid {
    mid: u16,
    peer: SocketAddr,
}

impl KeyMid {
    pub fn new(mid: u16, peer: SocketAddr) -> Self {
        Self { mid, peer }
    }

    /// Key for a received message, scoped to its source.
    pub fn from_inbound(message: &MessageCore) -> Option<Self> {
        Some(Self::new(message.mid()?, message.source()?.peer()))
    }

    /// Key for an outgoing message, scoped to its destination.
    pub fn from_outbound(message: &MessageCore) -> Option<Self> {
        Some(Self::new(message.mid()?, message.destination()?.peer()))
    }

    pub fn mid(&self) -> u16 {
        self.mid
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Display for KeyMid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.mid, self.peer)
    }
}

/// Sequential message IDs starting from a random offset, wrapping at 2^16.
#[derive(Debug)]
pub(crate) struct MidProvider(AtomicU16);

impl MidProvider {
    pub(crate) fn new() -> Self {
        Self(AtomicU16::new(rand::random()))
    }

    pub(crate) fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Random tokens of a fixed size.
#[derive(Debug)]
pub(crate) struct TokenGenerator {
    size: usize,
}

impl TokenGenerator {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size: size.clamp(1, MAX_TOKEN_LENGTH),
        }
    }

    pub(crate) fn next(&self) -> Token {
        let mut bytes = vec![0_u8; self.size];
        rand::thread_rng().fill_bytes(&mut bytes);
        Token::new(bytes).unwrap_or_default()
    }
}
