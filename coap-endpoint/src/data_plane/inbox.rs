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

//! Ingress pipeline between the connector and the bottom of the stack.

use super::log_stack_error;
use crate::endpoint::EndpointShared;
use crate::message::{EmptyMessage, EndpointContext, Message, MessageType, Request, Response};
use crate::observability::fields::{self, MessageLogFields};
use crate::observability::events;
use crate::transport::codec::MessageFormatError;
use crate::transport::{InboundError, RawData, RawDataReceiver};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, warn, Level};

const COMPONENT: &str = "inbox";

/// Receiver the endpoint installs on its connector.
pub(crate) struct Inbox {
    endpoint: Weak<EndpointShared>,
}

impl Inbox {
    pub(crate) fn new(endpoint: Weak<EndpointShared>) -> Self {
        Self { endpoint }
    }

    fn reject(reason: &'static str, raw: &RawData, error: InboundError) -> Result<(), InboundError> {
        debug!(
            event = events::INGRESS_BOUNDARY_REJECTED,
            component = COMPONENT,
            reason,
            peer = fields::format_peer(raw.context()).as_str(),
            bytes = raw.bytes().len(),
            "inbound data rejected at the boundary"
        );
        Err(error)
    }
}

impl RawDataReceiver for Inbox {
    fn receive_data(&self, raw: RawData) -> Result<(), InboundError> {
        let Some(context) = raw.context() else {
            return Self::reject(fields::REASON_MISSING_CONTEXT, &raw, InboundError::MissingContext);
        };
        if context.peer().port() == 0 {
            return Self::reject(
                fields::REASON_MISSING_SOURCE_PORT,
                &raw,
                InboundError::MissingSourcePort,
            );
        }
        let Some(shared) = self.endpoint.upgrade() else {
            return Self::reject(fields::REASON_NOT_STARTED, &raw, InboundError::NotStarted);
        };
        let Some(executor) = shared.running_executor() else {
            return Self::reject(fields::REASON_NOT_STARTED, &raw, InboundError::NotStarted);
        };

        let endpoint = Arc::downgrade(&shared);
        executor.execute(Box::new(move || {
            if let Some(shared) = endpoint.upgrade() {
                receive_message(&shared, raw);
            }
        }));
        Ok(())
    }
}

/// Parses one datagram and walks it through the inbound path. Runs on the protocol stage.
fn receive_message(shared: &Arc<EndpointShared>, raw: RawData) {
    let Some(source) = raw.context().cloned() else {
        return;
    };
    let message = match shared.codec.parse(raw.bytes()) {
        Ok(message) => message,
        Err(err) => {
            handle_malformed(shared, &source, &err);
            return;
        }
    };
    if let Err(err) = message.core().set_source(source) {
        debug!(
            component = COMPONENT,
            err = %err,
            "unable to record the source of an inbound message"
        );
        return;
    }

    if tracing::enabled!(Level::DEBUG) {
        let log_fields = MessageLogFields::from_message(message.core());
        debug!(
            event = events::INGRESS_RECEIVE,
            component = COMPONENT,
            kind = message.kind(),
            mid = log_fields.mid.as_str(),
            token = log_fields.token.as_str(),
            msg_type = log_fields.msg_type.as_str(),
            code = log_fields.code.as_str(),
            peer = log_fields.peer.as_str(),
            bytes = raw.bytes().len(),
            "received message"
        );
    }

    match message {
        Message::Request(request) => receive_request(shared, &request),
        Message::Response(response) => receive_response(shared, &response, raw.received_at()),
        Message::Empty(empty) => receive_empty_message(shared, &empty),
    }
}

fn handle_malformed(shared: &Arc<EndpointShared>, source: &EndpointContext, err: &MessageFormatError) {
    let rejectable_mid = (!shared.protocol.is_reliable() && err.is_rejectable())
        .then(|| err.mid())
        .flatten();
    let Some(mid) = rejectable_mid else {
        debug!(
            event = events::INGRESS_MALFORMED_DROPPED,
            component = COMPONENT,
            peer = %source.peer(),
            reason = err.reason(),
            "dropping malformed message"
        );
        return;
    };

    debug!(
        event = events::INGRESS_MALFORMED_REJECTED,
        component = COMPONENT,
        peer = %source.peer(),
        mid,
        reason = err.reason(),
        "rejecting malformed confirmable message"
    );
    let reset = EmptyMessage::new(MessageType::Reset)
        .with_mid(mid)
        .with_destination(source.clone());
    send_reset(shared, &reset);
}

fn send_reset(shared: &Arc<EndpointShared>, reset: &EmptyMessage) {
    if let Err(err) = shared.outbox.send_empty_message(None, reset) {
        warn!(
            event = events::EGRESS_SEND_FAILED,
            component = COMPONENT,
            err = %err,
            "unable to send reset"
        );
    }
}

fn log_canceled(kind: &'static str) {
    debug!(
        event = events::INGRESS_CANCELED,
        component = COMPONENT,
        kind,
        reason = fields::REASON_INTERCEPTOR_CANCELED,
        "inbound message canceled by interceptor"
    );
}

fn receive_request(shared: &Arc<EndpointShared>, request: &Request) {
    for interceptor in shared.interceptors.snapshot().iter() {
        interceptor.receive_request(request);
    }
    if request.is_canceled() {
        log_canceled("request");
        return;
    }

    let exchange = shared.matcher.receive_request(request);
    exchange.set_endpoint(Arc::downgrade(shared));
    if let Err(err) = shared.stack.receive_request(&exchange, request) {
        log_stack_error(COMPONENT, exchange.id(), &err);
    }
}

fn receive_response(shared: &Arc<EndpointShared>, response: &Response, received_at: Option<Instant>) {
    for interceptor in shared.interceptors.snapshot().iter() {
        interceptor.receive_response(response);
    }
    if response.is_canceled() {
        log_canceled("response");
        return;
    }

    let Some(exchange) = shared.matcher.receive_response(response) else {
        let message_type = response.message_type();
        if message_type.is_none() || message_type == Some(MessageType::Acknowledgement) {
            debug!(
                event = events::INGRESS_UNMATCHED_RESPONSE,
                component = COMPONENT,
                mid = fields::format_mid(response.mid()).as_str(),
                token = fields::format_token(response.token().as_ref()).as_str(),
                "dropping unmatched response"
            );
            return;
        }
        debug!(
            event = events::INGRESS_UNMATCHED_RESPONSE,
            component = COMPONENT,
            mid = fields::format_mid(response.mid()).as_str(),
            token = fields::format_token(response.token().as_ref()).as_str(),
            "rejecting unmatched response"
        );
        send_reset(shared, &EmptyMessage::rst_for(response));
        return;
    };

    exchange.set_endpoint(Arc::downgrade(shared));
    if let Some(rtt) = exchange.calculate_rtt() {
        let rtt = match received_at {
            Some(received_at) => rtt.saturating_sub(received_at.elapsed()),
            None => rtt,
        };
        response.set_rtt(rtt);
    }
    if let Err(err) = shared.stack.receive_response(&exchange, response) {
        log_stack_error(COMPONENT, exchange.id(), &err);
    }
}

fn receive_empty_message(shared: &Arc<EndpointShared>, message: &EmptyMessage) {
    for interceptor in shared.interceptors.snapshot().iter() {
        interceptor.receive_empty_message(message);
    }
    if message.is_canceled() {
        log_canceled("empty");
        return;
    }

    match message.message_type() {
        Some(MessageType::Confirmable) | Some(MessageType::NonConfirmable) => {
            debug!(
                event = events::INGRESS_PING,
                component = COMPONENT,
                mid = fields::format_mid(message.mid()).as_str(),
                peer = fields::format_peer(message.source().as_ref()).as_str(),
                "answering ping with reset"
            );
            send_reset(shared, &EmptyMessage::rst_for(message));
        }
        Some(MessageType::Acknowledgement) | Some(MessageType::Reset) => {
            let Some(exchange) = shared.matcher.receive_empty_message(message) else {
                debug!(
                    event = events::INGRESS_UNMATCHED_EMPTY,
                    component = COMPONENT,
                    mid = fields::format_mid(message.mid()).as_str(),
                    "ignoring unmatched acknowledgement or reset"
                );
                return;
            };
            exchange.set_endpoint(Arc::downgrade(shared));
            if let Err(err) = shared.stack.receive_empty_message(&exchange, message) {
                log_stack_error(COMPONENT, exchange.id(), &err);
            }
        }
        None => debug!(
            event = events::INGRESS_UNMATCHED_EMPTY,
            component = COMPONENT,
            "ignoring signaling message"
        ),
    }
}
