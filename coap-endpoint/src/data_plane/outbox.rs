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

//! Egress pipeline below the last stack layer.

use crate::control_plane::MessageInterceptor;
use crate::error::SendError;
use crate::exchange::Exchange;
use crate::matching::Matcher;
use crate::message::{EmptyMessage, EndpointContext, Message, MessageCore, Request, Response};
use crate::observability::events;
use crate::observability::fields::{self, MessageLogFields};
use crate::runtime::listener_list::ListenerList;
use crate::stack::{StackError, StackResult};
use crate::transport::codec::MessageCodec;
use crate::transport::{Connector, MessageCallback, RawData};
use std::sync::Arc;
use tracing::{debug, warn, Level};

const COMPONENT: &str = "outbox";

/// Registers, intercepts, serializes and transmits outbound messages.
pub(crate) struct Outbox {
    matcher: Arc<dyn Matcher>,
    interceptors: Arc<ListenerList<dyn MessageInterceptor>>,
    codec: Arc<dyn MessageCodec>,
    connector: Arc<dyn Connector>,
}

impl Outbox {
    pub(crate) fn new(
        matcher: Arc<dyn Matcher>,
        interceptors: Arc<ListenerList<dyn MessageInterceptor>>,
        codec: Arc<dyn MessageCodec>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            matcher,
            interceptors,
            codec,
            connector,
        }
    }

    pub(crate) fn send_request(&self, exchange: &Exchange, request: &Request) -> StackResult<()> {
        let destination = request.destination().ok_or(StackError::MissingDestination)?;
        let callback = MessageCallback::request(request.clone(), exchange.clone());

        if let Err(err) = self.matcher.send_request(exchange, request) {
            log_register_failed(exchange, request, &err);
            callback.on_error(SendError::Registration(err.to_string()));
            return Err(err.into());
        }
        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_request(request);
        }
        request.set_ready_to_send();

        if request.is_canceled() {
            log_canceled(exchange, request);
            exchange.set_complete();
            return Ok(());
        }
        exchange.mark_sent_now();
        self.transmit(Message::Request(request.clone()), destination, callback)
    }

    pub(crate) fn send_response(&self, exchange: &Exchange, response: &Response) -> StackResult<()> {
        let destination = response.destination().ok_or(StackError::MissingDestination)?;
        let callback = MessageCallback::forward(response.clone().into(), Some(exchange.clone()));

        if let Err(err) = self.matcher.send_response(exchange, response) {
            log_register_failed(exchange, response, &err);
            callback.on_error(SendError::Registration(err.to_string()));
            return Err(err.into());
        }
        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_response(response);
        }
        response.set_ready_to_send();

        if response.is_canceled() {
            log_canceled(exchange, response);
            exchange.set_complete();
            return Ok(());
        }
        self.transmit(Message::Response(response.clone()), destination, callback)
    }

    pub(crate) fn send_empty_message(
        &self,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        let destination = message.destination().ok_or(StackError::MissingDestination)?;
        let callback = MessageCallback::forward(message.clone().into(), None);

        if let Err(err) = self.matcher.send_empty_message(exchange, message) {
            warn!(
                event = events::EGRESS_REGISTER_FAILED,
                component = COMPONENT,
                err = %err,
                "unable to prepare empty message"
            );
            callback.on_error(SendError::Registration(err.to_string()));
            return Err(err.into());
        }
        for interceptor in self.interceptors.snapshot().iter() {
            interceptor.send_empty_message(message);
        }
        message.set_ready_to_send();

        if message.is_canceled() {
            debug!(
                event = events::EGRESS_CANCELED,
                component = COMPONENT,
                "empty message canceled before transmission"
            );
            if let Some(exchange) = exchange {
                exchange.set_complete();
            }
            return Ok(());
        }
        self.transmit(Message::Empty(message.clone()), destination, callback)
    }

    fn transmit(
        &self,
        message: Message,
        destination: EndpointContext,
        callback: MessageCallback,
    ) -> StackResult<()> {
        let bytes = match self.codec.serialize(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    event = events::EGRESS_SERIALIZE_FAILED,
                    component = COMPONENT,
                    kind = message.kind(),
                    err = %err,
                    "unable to serialize outbound message"
                );
                callback.on_error(SendError::Serialization(err.to_string()));
                return Err(err.into());
            }
        };

        if tracing::enabled!(Level::DEBUG) {
            let fields = MessageLogFields::from_message(message.core());
            debug!(
                event = events::EGRESS_SEND_ATTEMPT,
                component = COMPONENT,
                kind = message.kind(),
                mid = fields.mid.as_str(),
                token = fields.token.as_str(),
                msg_type = fields.msg_type.as_str(),
                code = fields.code.as_str(),
                peer = fields.peer.as_str(),
                bytes = bytes.len(),
                "handing message to connector"
            );
        }
        self.connector
            .send(RawData::outbound(bytes, destination, Some(callback)));
        Ok(())
    }
}

fn log_register_failed(exchange: &Exchange, message: &MessageCore, err: &impl std::fmt::Display) {
    warn!(
        event = events::EGRESS_REGISTER_FAILED,
        component = COMPONENT,
        exchange_id = exchange.id(),
        token = fields::format_token(message.token().as_ref()).as_str(),
        err = %err,
        "matcher rejected outbound message"
    );
}

fn log_canceled(exchange: &Exchange, message: &MessageCore) {
    debug!(
        event = events::EGRESS_CANCELED,
        component = COMPONENT,
        exchange_id = exchange.id(),
        mid = fields::format_mid(message.mid()).as_str(),
        "message canceled before transmission"
    );
}

#[cfg(test)]
mod tests {
    use crate::config::EndpointConfig;
    use crate::control_plane::MessageInterceptor;
    use crate::error::SendError;
    use crate::exchange::{CleanupObserver, Exchange};
    use crate::message::{Code, EndpointContext, MessageError, MessageType, Request, Response};
    use crate::stack::test_harness::{Harness, RecordingConnector};
    use crate::stack::StackError;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn peer() -> EndpointContext {
        EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)))
    }

    struct CancelAll;

    impl MessageInterceptor for CancelAll {
        fn send_request(&self, request: &Request) {
            request.cancel();
        }
    }

    #[test]
    fn request_reaches_connector_frozen() {
        let harness = Harness::udp(EndpointConfig::default());
        let request = Request::get().with_destination(peer());

        let exchange = harness.send_request(&request);

        assert!(request.is_ready_to_send());
        assert!(request.mid().is_some());
        assert_eq!(harness.sent_count(), 1);
        assert!(exchange.calculate_rtt().is_some());
        assert_eq!(
            request.set_code(Code::POST),
            Err(MessageError::ReadyToSend)
        );
    }

    #[test]
    fn canceling_interceptor_stops_transmission() {
        let harness = Harness::udp(EndpointConfig::default());
        harness.interceptors.add(Arc::new(CancelAll));
        let request = Request::get().with_destination(peer());

        let exchange = harness.send_request(&request);

        assert_eq!(harness.sent_count(), 0);
        assert!(exchange.is_complete());
        assert!(harness.store.is_empty());
    }

    #[test]
    fn request_canceled_before_its_send_task_leaves_store_empty() {
        let harness = Harness::udp(EndpointConfig::default());
        let request = Request::get()
            .with_type(MessageType::Confirmable)
            .with_destination(peer());
        let exchange = Exchange::new_local(request.clone());
        CleanupObserver::attach(&exchange, &request);

        request.cancel();
        assert!(exchange.is_complete());
        harness
            .stack
            .send_request(&exchange, &request)
            .expect("canceled request is dropped quietly");

        assert_eq!(harness.sent_count(), 0);
        assert_eq!(harness.store.token_count(), 0);
        assert_eq!(harness.store.mid_count(), 0);
    }

    #[test]
    fn missing_destination_is_reported() {
        let harness = Harness::udp(EndpointConfig::default());
        let request = Request::get();
        let exchange = Exchange::new_local(request.clone());

        let result = harness.outbox.send_request(&exchange, &request);

        assert_eq!(result, Err(StackError::MissingDestination));
        assert_eq!(harness.sent_count(), 0);
    }

    #[test]
    fn serialization_failure_reaches_callback() {
        let harness = Harness::udp(EndpointConfig::default());
        let request = Request::inbound(None, Code::GET);
        let exchange = Exchange::new_remote(request.clone());
        let response = Response::new(Code::CONTENT).with_destination(peer());

        // No type was chosen for the response, so the datagram cannot be framed.
        let result = harness.outbox.send_response(&exchange, &response);

        assert!(matches!(result, Err(StackError::Serialize(_))));
        assert!(matches!(response.send_error(), Some(SendError::Serialization(_))));
        assert!(exchange.is_complete());
    }

    #[test]
    fn connector_outcome_flows_back() {
        let connector = RecordingConnector::new();
        let harness = Harness::with_connector(EndpointConfig::default(), connector.clone());
        let request = Request::get()
            .with_type(MessageType::NonConfirmable)
            .with_destination(peer());

        harness.send_request(&request);
        connector.complete_all();

        assert!(request.is_sent());
    }
}
