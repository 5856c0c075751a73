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

//! Processing stack.
//!
//! An ordered chain of layers fixed at construction. Outbound messages enter at
//! the top and leave through the outbox below the last layer; inbound messages
//! enter at the bottom and reach the deliverer above the first layer. Every
//! layer defaults to passing messages through unchanged.
//!
//! Datagram transports run `[observe, blockwise, reliability]`; stream
//! transports drop the reliability layer because the transport already
//! retransmits and orders.

pub(crate) mod blockwise;
pub(crate) mod observe;
pub(crate) mod reliability;
#[cfg(test)]
pub(crate) mod test_harness;

use crate::config::EndpointConfig;
use crate::control_plane::{MessageDeliverer, NotificationListener};
use crate::data_plane::outbox::Outbox;
use crate::exchange::Exchange;
use crate::matching::{MatchError, ObservationStore};
use crate::message::{EmptyMessage, MessageError, Request, Response};
use crate::observability::events;
use crate::runtime::listener_list::ListenerList;
use crate::runtime::{read, write, Executor};
use crate::transport::codec::SerializeError;
use crate::transport::Protocol;
use blockwise::BlockwiseLayer;
use observe::ObserveLayer;
use reliability::ReliabilityLayer;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};
use tracing::warn;

const COMPONENT: &str = "protocol_stack";

/// Shared slot holding the endpoint's current executor.
pub(crate) type ExecutorSlot = Arc<RwLock<Option<Arc<dyn Executor>>>>;

/// Failure processing one message inside the stack. It aborts that message only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StackError {
    MissingDestination,
    Message(MessageError),
    Match(MatchError),
    Serialize(SerializeError),
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StackError::MissingDestination => write!(f, "message has no destination context"),
            StackError::Message(err) => write!(f, "{err}"),
            StackError::Match(err) => write!(f, "matcher rejected message: {err}"),
            StackError::Serialize(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StackError::MissingDestination => None,
            StackError::Message(err) => Some(err),
            StackError::Match(err) => Some(err),
            StackError::Serialize(err) => Some(err),
        }
    }
}

impl From<MessageError> for StackError {
    fn from(err: MessageError) -> Self {
        StackError::Message(err)
    }
}

impl From<MatchError> for StackError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::MissingDestination => StackError::MissingDestination,
            other => StackError::Match(other),
        }
    }
}

impl From<SerializeError> for StackError {
    fn from(err: SerializeError) -> Self {
        StackError::Serialize(err)
    }
}

pub(crate) type StackResult<T> = Result<T, StackError>;

/// One stage of the processing stack.
pub(crate) trait Layer: Send + Sync {
    fn send_request(&self, link: &LayerLink<'_>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        link.send_request(exchange, request)
    }

    fn send_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        link.send_response(exchange, response)
    }

    fn send_empty_message(
        &self,
        link: &LayerLink<'_>,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        link.send_empty_message(exchange, message)
    }

    fn receive_request(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
    ) -> StackResult<()> {
        link.receive_request(exchange, request)
    }

    fn receive_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        link.receive_response(exchange, response)
    }

    fn receive_empty_message(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        link.receive_empty_message(exchange, message)
    }

    /// Drops cached transfer state.
    fn clear(&self) {}
}

/// Position of a layer in its stack; moves messages to the neighbouring layer.
pub(crate) struct LayerLink<'a> {
    stack: &'a Arc<ProtocolStack>,
    index: usize,
}

impl<'a> LayerLink<'a> {
    pub(crate) fn new(stack: &'a Arc<ProtocolStack>, index: usize) -> Self {
        Self { stack, index }
    }

    pub(crate) fn stack(&self) -> &'a Arc<ProtocolStack> {
        self.stack
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.stack.executor()
    }

    fn below(&self) -> Option<(LayerLink<'a>, &'a dyn Layer)> {
        let index = self.index + 1;
        self.stack
            .layers
            .get(index)
            .map(|layer| (LayerLink::new(self.stack, index), layer.as_ref()))
    }

    fn above(&self) -> Option<(LayerLink<'a>, &'a dyn Layer)> {
        let index = self.index.checked_sub(1)?;
        self.stack
            .layers
            .get(index)
            .map(|layer| (LayerLink::new(self.stack, index), layer.as_ref()))
    }

    pub(crate) fn send_request(&self, exchange: &Exchange, request: &Request) -> StackResult<()> {
        match self.below() {
            Some((link, layer)) => layer.send_request(&link, exchange, request),
            None => self.stack.outbox.send_request(exchange, request),
        }
    }

    pub(crate) fn send_response(&self, exchange: &Exchange, response: &Response) -> StackResult<()> {
        match self.below() {
            Some((link, layer)) => layer.send_response(&link, exchange, response),
            None => self.stack.outbox.send_response(exchange, response),
        }
    }

    pub(crate) fn send_empty_message(
        &self,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        match self.below() {
            Some((link, layer)) => layer.send_empty_message(&link, exchange, message),
            None => self.stack.outbox.send_empty_message(exchange, message),
        }
    }

    pub(crate) fn receive_request(&self, exchange: &Exchange, request: &Request) -> StackResult<()> {
        match self.above() {
            Some((link, layer)) => layer.receive_request(&link, exchange, request),
            None => {
                self.stack.deliver_request(exchange);
                Ok(())
            }
        }
    }

    pub(crate) fn receive_response(&self, exchange: &Exchange, response: &Response) -> StackResult<()> {
        match self.above() {
            Some((link, layer)) => layer.receive_response(&link, exchange, response),
            None => {
                self.stack.deliver_response(exchange, response);
                Ok(())
            }
        }
    }

    pub(crate) fn receive_empty_message(
        &self,
        exchange: &Exchange,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        match self.above() {
            Some((link, layer)) => layer.receive_empty_message(&link, exchange, message),
            None => Ok(()),
        }
    }
}

pub(crate) struct ProtocolStack {
    layers: Vec<Box<dyn Layer>>,
    outbox: Arc<Outbox>,
    deliverer: RwLock<Option<Arc<dyn MessageDeliverer>>>,
    executor: ExecutorSlot,
}

impl ProtocolStack {
    pub(crate) fn for_protocol(
        protocol: Protocol,
        config: &EndpointConfig,
        outbox: Arc<Outbox>,
        observations: Arc<dyn ObservationStore>,
        notification_listeners: Arc<ListenerList<dyn NotificationListener>>,
        executor: ExecutorSlot,
    ) -> Arc<Self> {
        let mut layers: Vec<Box<dyn Layer>> = vec![
            Box::new(ObserveLayer::new(config, observations, notification_listeners)),
            Box::new(BlockwiseLayer::new(config)),
        ];
        if !protocol.is_reliable() {
            layers.push(Box::new(ReliabilityLayer::new(config)));
        }
        Arc::new(Self {
            layers,
            outbox,
            deliverer: RwLock::new(None),
            executor,
        })
    }

    pub(crate) fn executor(&self) -> Option<Arc<dyn Executor>> {
        read(&self.executor).clone()
    }

    pub(crate) fn set_deliverer(&self, deliverer: Arc<dyn MessageDeliverer>) {
        *write(&self.deliverer) = Some(deliverer);
    }

    pub(crate) fn has_deliverer(&self) -> bool {
        read(&self.deliverer).is_some()
    }

    fn top(self: &Arc<Self>) -> Option<(LayerLink<'_>, &dyn Layer)> {
        self.layers
            .first()
            .map(|layer| (LayerLink::new(self, 0), layer.as_ref()))
    }

    fn bottom(self: &Arc<Self>) -> Option<(LayerLink<'_>, &dyn Layer)> {
        let index = self.layers.len().checked_sub(1)?;
        self.layers
            .get(index)
            .map(|layer| (LayerLink::new(self, index), layer.as_ref()))
    }

    pub(crate) fn send_request(self: &Arc<Self>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        match self.top() {
            Some((link, layer)) => layer.send_request(&link, exchange, request),
            None => self.outbox.send_request(exchange, request),
        }
    }

    /// Records `response` as the exchange's current response and sends it down.
    pub(crate) fn send_response(self: &Arc<Self>, exchange: &Exchange, response: &Response) -> StackResult<()> {
        exchange.set_response(response.clone());
        match self.top() {
            Some((link, layer)) => layer.send_response(&link, exchange, response),
            None => self.outbox.send_response(exchange, response),
        }
    }

    pub(crate) fn send_empty_message(
        self: &Arc<Self>,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        match self.top() {
            Some((link, layer)) => layer.send_empty_message(&link, exchange, message),
            None => self.outbox.send_empty_message(exchange, message),
        }
    }

    pub(crate) fn receive_request(self: &Arc<Self>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        match self.bottom() {
            Some((link, layer)) => layer.receive_request(&link, exchange, request),
            None => {
                self.deliver_request(exchange);
                Ok(())
            }
        }
    }

    pub(crate) fn receive_response(self: &Arc<Self>, exchange: &Exchange, response: &Response) -> StackResult<()> {
        match self.bottom() {
            Some((link, layer)) => layer.receive_response(&link, exchange, response),
            None => {
                self.deliver_response(exchange, response);
                Ok(())
            }
        }
    }

    pub(crate) fn receive_empty_message(
        self: &Arc<Self>,
        exchange: &Exchange,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        match self.bottom() {
            Some((link, layer)) => layer.receive_empty_message(&link, exchange, message),
            None => Ok(()),
        }
    }

    fn deliver_request(&self, exchange: &Exchange) {
        let deliverer = read(&self.deliverer).clone();
        match deliverer {
            Some(deliverer) => deliverer.deliver_request(exchange),
            None => warn!(
                event = events::STACK_TASK_FAILED,
                component = COMPONENT,
                exchange_id = exchange.id(),
                "no deliverer installed; dropping request"
            ),
        }
    }

    /// Completes the exchange unless the response keeps an observation alive,
    /// then hands the response to the deliverer.
    fn deliver_response(&self, exchange: &Exchange, response: &Response) {
        let keeps_observing = response.is_notification()
            && exchange.request().is_observe()
            && !exchange.request().is_canceled();
        if !keeps_observing {
            exchange.set_complete();
        }

        let deliverer = read(&self.deliverer).clone();
        match deliverer {
            Some(deliverer) => deliverer.deliver_response(exchange, response),
            None => exchange.request().set_response(response.clone()),
        }
    }

    pub(crate) fn clear(&self) {
        for layer in &self.layers {
            layer.clear();
        }
    }

    pub(crate) fn destroy(&self) {
        self.clear();
        write(&self.deliverer).take();
    }
}
