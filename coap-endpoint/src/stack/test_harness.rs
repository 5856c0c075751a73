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

//! In-crate fixtures for driving one protocol stack without threads or sockets.

use super::{ExecutorSlot, ProtocolStack};
use crate::config::EndpointConfig;
use crate::control_plane::{MessageDeliverer, MessageInterceptor, NotificationListener};
use crate::data_plane::outbox::Outbox;
use crate::exchange::Exchange;
use crate::matching::{
    ExchangeStore, InMemoryObservationStore, Matcher, ObservationStore, TcpMatcher, UdpMatcher,
};
use crate::message::{Code, EmptyMessage, EndpointContext, Message, MessageType, Request, Response, Token};
use crate::runtime::listener_list::ListenerList;
use crate::runtime::{lock, Executor, ScheduledTask, Task};
use crate::transport::codec::codec_for;
use crate::transport::{Connector, ConnectorError, InboundError, Protocol, RawData, RawDataReceiver};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub(crate) fn peer() -> EndpointContext {
    EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)))
}

/// Runs tasks inline and timers on a virtual clock moved by [`VirtualExecutor::advance`].
#[derive(Default)]
pub(crate) struct VirtualExecutor {
    state: Mutex<VirtualState>,
}

#[derive(Default)]
struct VirtualState {
    now: Duration,
    sequence: u64,
    timers: Vec<(Duration, u64, Task)>,
}

impl VirtualExecutor {
    pub(crate) fn advance(&self, by: Duration) {
        let target = lock(&self.state).now + by;
        loop {
            let next = {
                let mut state = lock(&self.state);
                let due = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _, _))| *at <= target)
                    .min_by_key(|(_, (at, sequence, _))| (*at, *sequence))
                    .map(|(index, _)| index);
                due.map(|index| {
                    let (at, _, task) = state.timers.remove(index);
                    state.now = at;
                    task
                })
            };
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        lock(&self.state).now = target;
    }
}

impl Executor for VirtualExecutor {
    fn execute(&self, task: Task) {
        task();
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let mut state = lock(&self.state);
        let at = state.now + delay;
        state.sequence += 1;
        let sequence = state.sequence;
        state.timers.push((at, sequence, handle.guard(task)));
        handle
    }
}

/// Connector that keeps every outbound datagram.
pub(crate) struct RecordingConnector {
    protocol: Protocol,
    sent: Mutex<Vec<RawData>>,
    receiver: Mutex<Option<Arc<dyn RawDataReceiver>>>,
}

impl RecordingConnector {
    pub(crate) fn new() -> Arc<Self> {
        Self::for_protocol(Protocol::Udp)
    }

    pub(crate) fn for_protocol(protocol: Protocol) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            sent: Mutex::new(Vec::new()),
            receiver: Mutex::new(None),
        })
    }

    /// Hands `raw` to the installed receiver as if it arrived from the network.
    pub(crate) fn inject(&self, raw: RawData) -> Result<(), InboundError> {
        let receiver = lock(&self.receiver).clone().expect("receiver should be installed");
        receiver.receive_data(raw)
    }

    pub(crate) fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Reports every recorded datagram as sent.
    pub(crate) fn complete_all(&self) {
        let callbacks: Vec<_> = lock(&self.sent)
            .iter_mut()
            .filter_map(RawData::take_callback)
            .collect();
        for callback in callbacks {
            callback.on_sent();
        }
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        let codec = codec_for(self.protocol);
        lock(&self.sent)
            .iter()
            .map(|raw| codec.parse(raw.bytes()).expect("recorded bytes should parse"))
            .collect()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn start(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn destroy(&self) {}

    fn send(&self, raw: RawData) {
        lock(&self.sent).push(raw);
    }

    fn set_receiver(&self, receiver: Arc<dyn RawDataReceiver>) {
        *lock(&self.receiver) = Some(receiver);
    }

    fn address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 5684)))
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}

#[derive(Default)]
pub(crate) struct RecordingDeliverer {
    requests: Mutex<Vec<Exchange>>,
    responses: Mutex<Vec<Response>>,
}

impl RecordingDeliverer {
    pub(crate) fn requests(&self) -> Vec<Exchange> {
        lock(&self.requests).clone()
    }

    pub(crate) fn responses(&self) -> Vec<Response> {
        lock(&self.responses).clone()
    }
}

impl MessageDeliverer for RecordingDeliverer {
    fn deliver_request(&self, exchange: &Exchange) {
        lock(&self.requests).push(exchange.clone());
    }

    fn deliver_response(&self, exchange: &Exchange, response: &Response) {
        exchange.request().set_response(response.clone());
        lock(&self.responses).push(response.clone());
    }
}

pub(crate) struct Harness {
    pub(crate) stack: Arc<ProtocolStack>,
    pub(crate) outbox: Arc<Outbox>,
    pub(crate) matcher: Arc<dyn Matcher>,
    pub(crate) store: Arc<ExchangeStore>,
    pub(crate) interceptors: Arc<ListenerList<dyn MessageInterceptor>>,
    pub(crate) notification_listeners: Arc<ListenerList<dyn NotificationListener>>,
    pub(crate) observations: Arc<dyn ObservationStore>,
    pub(crate) executor: Arc<VirtualExecutor>,
    pub(crate) connector: Arc<RecordingConnector>,
    pub(crate) deliverer: Arc<RecordingDeliverer>,
}

impl Harness {
    pub(crate) fn udp(config: EndpointConfig) -> Self {
        Self::with_connector(config, RecordingConnector::new())
    }

    pub(crate) fn tcp(config: EndpointConfig) -> Self {
        Self::with_connector(config, RecordingConnector::for_protocol(Protocol::Tcp))
    }

    pub(crate) fn with_connector(config: EndpointConfig, connector: Arc<RecordingConnector>) -> Self {
        let protocol = connector.protocol();
        let observations: Arc<dyn ObservationStore> = Arc::new(InMemoryObservationStore::new());
        let (matcher, store): (Arc<dyn Matcher>, Arc<ExchangeStore>) = if protocol.is_reliable() {
            let matcher = TcpMatcher::new(&config, observations.clone());
            let store = matcher.store().clone();
            (Arc::new(matcher), store)
        } else {
            let matcher = UdpMatcher::new(&config, observations.clone());
            let store = matcher.store().clone();
            (Arc::new(matcher), store)
        };
        let interceptors = Arc::new(ListenerList::new());
        let outbox = Arc::new(Outbox::new(
            matcher.clone(),
            interceptors.clone(),
            codec_for(protocol),
            connector.clone(),
        ));
        let executor = Arc::new(VirtualExecutor::default());
        let slot: ExecutorSlot = Arc::new(RwLock::new(Some(executor.clone() as Arc<dyn Executor>)));
        let notification_listeners = Arc::new(ListenerList::new());
        let stack = ProtocolStack::for_protocol(
            protocol,
            &config,
            outbox.clone(),
            observations.clone(),
            notification_listeners.clone(),
            slot,
        );
        let deliverer = Arc::new(RecordingDeliverer::default());
        stack.set_deliverer(deliverer.clone());

        Self {
            stack,
            outbox,
            matcher,
            store,
            interceptors,
            notification_listeners,
            observations,
            executor,
            connector,
            deliverer,
        }
    }

    /// Starts a local exchange for `request` and sends it down the stack.
    pub(crate) fn send_request(&self, request: &Request) -> Exchange {
        let exchange = Exchange::new_local(request.clone());
        self.stack
            .send_request(&exchange, request)
            .expect("request should enter the stack");
        exchange
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.executor.advance(by);
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.connector.sent_count()
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        self.connector.sent_messages()
    }

    pub(crate) fn delivered_requests(&self) -> usize {
        self.deliverer.requests().len()
    }

    pub(crate) fn delivered_responses(&self) -> usize {
        self.deliverer.responses().len()
    }

    pub(crate) fn inbound_request(&self, message_type: MessageType, mid: u16) -> Request {
        let request = Request::inbound(Some(message_type), Code::GET);
        request.set_mid(mid).expect("fresh request");
        request
            .set_token(Token::new(vec![0x42]).expect("valid token"))
            .expect("fresh request");
        request.set_source(peer()).expect("fresh request");
        request
    }

    pub(crate) fn inbound_response(&self, message_type: MessageType, mid: u16, token: Token) -> Response {
        let response = Response::inbound(Some(message_type), Code::CONTENT);
        response.set_mid(mid).expect("fresh response");
        response.set_token(token).expect("fresh response");
        response.set_source(peer()).expect("fresh response");
        response
    }

    pub(crate) fn inbound_empty(&self, message_type: MessageType, mid: u16) -> EmptyMessage {
        let message = EmptyMessage::inbound(Some(message_type));
        message.set_mid(mid).expect("fresh message");
        message.set_token(Token::empty()).expect("fresh message");
        message.set_source(peer()).expect("fresh message");
        message
    }
}
