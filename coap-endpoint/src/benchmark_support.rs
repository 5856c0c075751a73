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

//! Deterministic benchmark fixtures for the Criterion harness.

use crate::config::EndpointConfig;
use crate::exchange::Exchange;
use crate::matching::{InMemoryObservationStore, Matcher, UdpMatcher};
use crate::message::{EndpointContext, Message, MessageType, Request, Token};
use crate::runtime::{Executor, ScheduledTask, Task};
use crate::transport::codec::{MessageCodec, TcpCodec, UdpCodec};
use crate::transport::{Connector, ConnectorError, Protocol, RawData, RawDataReceiver};
use crate::Endpoint;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn peer(index: usize) -> EndpointContext {
    let port = 20_000 + (index % 20_000) as u16;
    EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], port)))
}

fn request(payload_len: usize) -> Request {
    Request::post()
        .with_mid(0x1234)
        .with_token(Token::new(vec![0xca, 0xfe, 0xba, 0xbe]).expect("token should fit"))
        .with_uri_path("bench/sensors/temperature")
        .with_payload(vec![0x5a; payload_len])
}

/// Fixed fixture for `codec/*` benchmark IDs.
pub struct CodecFixture {
    message: Message,
    udp_bytes: Vec<u8>,
    tcp_bytes: Vec<u8>,
}

impl CodecFixture {
    pub fn new(payload_len: usize) -> Self {
        let message = Message::Request(request(payload_len));
        let udp_bytes = UdpCodec
            .serialize(&message)
            .expect("fixture request should serialize");
        let tcp_bytes = TcpCodec
            .serialize(&message)
            .expect("fixture request should serialize");
        Self {
            message,
            udp_bytes,
            tcp_bytes,
        }
    }

    pub fn serialize_udp_len(&self) -> usize {
        UdpCodec.serialize(&self.message).map_or(0, |bytes| bytes.len())
    }

    pub fn parse_udp_ok(&self) -> bool {
        UdpCodec.parse(&self.udp_bytes).is_ok()
    }

    pub fn parse_tcp_ok(&self) -> bool {
        TcpCodec.parse(&self.tcp_bytes).is_ok()
    }
}

/// Fixed fixture for `matcher/*` benchmark IDs.
pub struct MatcherFixture {
    matcher: UdpMatcher,
    tokens: Vec<Token>,
    _exchanges: Vec<Exchange>,
}

impl MatcherFixture {
    pub fn new(open_exchanges: usize) -> Self {
        let matcher = UdpMatcher::new(
            &EndpointConfig::default(),
            Arc::new(InMemoryObservationStore::new()),
        );
        let total = open_exchanges.max(1);
        let mut exchanges = Vec::with_capacity(total);
        let mut tokens = Vec::with_capacity(total);

        for index in 0..total {
            let request = Request::get()
                .with_type(MessageType::NonConfirmable)
                .with_destination(peer(index));
            let exchange = Exchange::new_local(request.clone());
            matcher
                .send_request(&exchange, &request)
                .expect("fixture request should register");
            tokens.push(request.token().expect("matcher assigns a token"));
            exchanges.push(exchange);
        }

        Self {
            matcher,
            tokens,
            _exchanges: exchanges,
        }
    }

    /// Looks up every open exchange by token; returns the hits.
    pub fn match_all(&self) -> usize {
        self.tokens
            .iter()
            .filter(|token| self.matcher.store().find_by_token(token).is_some())
            .count()
    }

    /// Registers and completes one fresh request.
    pub fn register_and_complete(&self, index: usize) -> bool {
        let request = Request::get()
            .with_type(MessageType::NonConfirmable)
            .with_destination(peer(index));
        let exchange = Exchange::new_local(request.clone());
        let registered = self.matcher.send_request(&exchange, &request).is_ok();
        exchange.set_complete();
        registered
    }
}

struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }

    fn schedule(&self, _delay: Duration, _task: Task) -> ScheduledTask {
        let scheduled = ScheduledTask::new();
        scheduled.cancel();
        scheduled
    }
}

#[derive(Default)]
struct CountingConnector {
    sent: AtomicUsize,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn start(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn destroy(&self) {}

    fn send(&self, mut raw: RawData) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if let Some(callback) = raw.take_callback() {
            callback.on_sent();
        }
    }

    fn set_receiver(&self, _receiver: Arc<dyn RawDataReceiver>) {}

    fn address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 5683)))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}

/// Fixed fixture for the `pipeline/send_request` benchmark ID.
pub struct PipelineFixture {
    endpoint: Endpoint,
    connector: Arc<CountingConnector>,
}

impl PipelineFixture {
    pub async fn new() -> Self {
        let connector = Arc::new(CountingConnector::default());
        let endpoint = Endpoint::builder(connector.clone())
            .executor(Arc::new(InlineExecutor))
            .build()
            .expect("default config should be valid");
        endpoint
            .start()
            .await
            .expect("benchmark endpoint should start");
        Self {
            endpoint,
            connector,
        }
    }

    /// Sends one non-confirmable request through stack and outbox; returns the send count.
    pub fn send_non_request(&self, index: usize) -> usize {
        let request = Request::get()
            .with_type(MessageType::NonConfirmable)
            .with_destination(peer(index))
            .with_uri_path("bench");
        if let Ok(exchange) = self.endpoint.send_request(request) {
            exchange.set_complete();
        }
        self.connector.sent.load(Ordering::Relaxed)
    }
}
