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

//! Transport boundary.
//!
//! A [`Connector`] moves raw bytes between the endpoint and the network. The
//! endpoint hands it outbound [`RawData`] carrying a [`MessageCallback`] and
//! installs itself as the [`RawDataReceiver`] for inbound bytes. Wire formats
//! live in [`codec`].

pub mod callback;
pub mod codec;
pub mod udp_connector;

pub use callback::MessageCallback;
pub use udp_connector::UdpConnector;

use crate::message::EndpointContext;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Udp,
    Dtls,
    Tcp,
    Tls,
}

impl Protocol {
    /// Reliable transports frame messages without type or message ID.
    pub fn is_reliable(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tls)
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Udp => "coap",
            Protocol::Dtls => "coaps",
            Protocol::Tcp => "coap+tcp",
            Protocol::Tls => "coaps+tcp",
        }
    }
}

/// Bytes crossing the transport boundary.
///
/// Inbound data carries the source context; outbound data the destination context
/// and the callback that reports the send outcome.
pub struct RawData {
    bytes: Vec<u8>,
    context: Option<EndpointContext>,
    callback: Option<MessageCallback>,
    received_at: Option<Instant>,
}

impl RawData {
    pub fn inbound(bytes: Vec<u8>, source: EndpointContext) -> Self {
        Self {
            bytes,
            context: Some(source),
            callback: None,
            received_at: Some(Instant::now()),
        }
    }

    /// Inbound data with possibly missing context, as some transports report it.
    pub fn inbound_unchecked(bytes: Vec<u8>, source: Option<EndpointContext>) -> Self {
        Self {
            bytes,
            context: source,
            callback: None,
            received_at: Some(Instant::now()),
        }
    }

    pub fn outbound(bytes: Vec<u8>, destination: EndpointContext, callback: Option<MessageCallback>) -> Self {
        Self {
            bytes,
            context: Some(destination),
            callback,
            received_at: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn context(&self) -> Option<&EndpointContext> {
        self.context.as_ref()
    }

    pub fn callback(&self) -> Option<&MessageCallback> {
        self.callback.as_ref()
    }

    pub fn take_callback(&mut self) -> Option<MessageCallback> {
        self.callback.take()
    }

    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }
}

impl Debug for RawData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawData")
            .field("len", &self.bytes.len())
            .field("context", &self.context)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Sink for inbound bytes, implemented by the endpoint inbox.
pub trait RawDataReceiver: Send + Sync {
    /// Validates `raw` and schedules its processing. Returns an error without
    /// scheduling any work when the data is unusable.
    fn receive_data(&self, raw: RawData) -> Result<(), InboundError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn start(&self) -> Result<(), ConnectorError>;

    async fn stop(&self);

    async fn destroy(&self);

    /// Sends asynchronously; the outcome is reported through the data's callback.
    fn send(&self, raw: RawData);

    fn set_receiver(&self, receiver: Arc<dyn RawDataReceiver>);

    fn address(&self) -> Option<SocketAddr>;

    fn protocol(&self) -> Protocol;
}

#[derive(Debug)]
pub enum ConnectorError {
    Bind(std::io::Error),
    NotRunning,
    Destroyed,
}

impl Display for ConnectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::Bind(err) => write!(f, "failed to bind socket: {err}"),
            ConnectorError::NotRunning => write!(f, "connector is not running"),
            ConnectorError::Destroyed => write!(f, "connector has been destroyed"),
        }
    }
}

impl Error for ConnectorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectorError::Bind(err) => Some(err),
            _ => None,
        }
    }
}

/// Boundary rejection of inbound data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InboundError {
    MissingContext,
    MissingSourcePort,
    NotStarted,
}

impl Display for InboundError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundError::MissingContext => write!(f, "inbound data has no endpoint context"),
            InboundError::MissingSourcePort => write!(f, "inbound data has no source port"),
            InboundError::NotStarted => write!(f, "endpoint is not started"),
        }
    }
}

impl Error for InboundError {}
