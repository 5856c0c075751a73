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

//! Confirmable retransmission and acknowledgement handling (RFC 7252 §4.2).

use super::{Layer, LayerLink, ProtocolStack, StackResult};
use crate::config::EndpointConfig;
use crate::exchange::{Exchange, Origin};
use crate::message::{EmptyMessage, MessageCore, MessageType, Request, Response};
use crate::observability::{events, fields};
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

const COMPONENT: &str = "reliability";

#[derive(Clone, Copy, Debug)]
struct TransmissionParams {
    ack_timeout: Duration,
    ack_random_factor: f64,
    ack_timeout_scale: f64,
    max_retransmit: u32,
}

impl TransmissionParams {
    /// Random initial timeout in `[ack_timeout, ack_timeout * ack_random_factor]`.
    fn initial_timeout(&self) -> Duration {
        let base = self.ack_timeout.as_secs_f64();
        let upper = base * self.ack_random_factor;
        if upper > base {
            Duration::from_secs_f64(rand::thread_rng().gen_range(base..=upper))
        } else {
            self.ack_timeout
        }
    }
}

/// The confirmable message a retransmission timer resends.
#[derive(Clone)]
enum Outgoing {
    Request(Request),
    Response(Response),
}

impl Outgoing {
    fn core(&self) -> &MessageCore {
        match self {
            Outgoing::Request(request) => request,
            Outgoing::Response(response) => response,
        }
    }
}

pub(crate) struct ReliabilityLayer {
    params: TransmissionParams,
}

impl ReliabilityLayer {
    pub(crate) fn new(config: &EndpointConfig) -> Self {
        Self {
            params: TransmissionParams {
                ack_timeout: config.ack_timeout(),
                ack_random_factor: config.ack_random_factor,
                ack_timeout_scale: config.ack_timeout_scale,
                max_retransmit: config.max_retransmit,
            },
        }
    }

    fn start_retransmission(&self, link: &LayerLink<'_>, exchange: &Exchange, message: Outgoing) {
        exchange.reset_failed_transmission_count();
        let timeout = self.params.initial_timeout();
        exchange.with_retransmission(|state| state.timeout = timeout);
        schedule_retransmission(link, exchange, message, self.params);
    }

    /// Picks the type of a response the application left untyped.
    fn response_type(request: &Request) -> MessageType {
        if !request.is_confirmable() {
            MessageType::NonConfirmable
        } else if request.is_acknowledged() {
            MessageType::Confirmable
        } else {
            MessageType::Acknowledgement
        }
    }

    fn handle_duplicate_request(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
    ) -> StackResult<()> {
        let current = exchange.current_request();
        if let Some(response) = exchange.response() {
            debug!(
                event = events::RELIABILITY_DUPLICATE,
                component = COMPONENT,
                exchange_id = exchange.id(),
                mid = fields::format_mid(request.mid()).as_str(),
                "duplicate request; resending current response"
            );
            return link.send_response(exchange, &response);
        }
        if current.is_acknowledged() {
            debug!(
                event = events::RELIABILITY_DUPLICATE,
                component = COMPONENT,
                exchange_id = exchange.id(),
                mid = fields::format_mid(request.mid()).as_str(),
                "duplicate request; acknowledging again"
            );
            return link.send_empty_message(Some(exchange), &EmptyMessage::ack_for(request));
        }
        if current.is_rejected() {
            debug!(
                event = events::RELIABILITY_DUPLICATE,
                component = COMPONENT,
                exchange_id = exchange.id(),
                mid = fields::format_mid(request.mid()).as_str(),
                "duplicate request; rejecting again"
            );
            return link.send_empty_message(Some(exchange), &EmptyMessage::rst_for(request));
        }
        debug!(
            event = events::RELIABILITY_DUPLICATE,
            component = COMPONENT,
            exchange_id = exchange.id(),
            mid = fields::format_mid(request.mid()).as_str(),
            "duplicate of a request still in progress; ignoring"
        );
        Ok(())
    }
}

impl Layer for ReliabilityLayer {
    fn send_request(&self, link: &LayerLink<'_>, exchange: &Exchange, request: &Request) -> StackResult<()> {
        if request.is_confirmable() {
            self.start_retransmission(link, exchange, Outgoing::Request(request.clone()));
        }
        let result = link.send_request(exchange, request);
        if result.is_err() {
            exchange.cancel_retransmission();
        }
        result
    }

    fn send_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        let request = exchange.current_request();
        if response.message_type().is_none() {
            response.set_type(Self::response_type(&request))?;
        }
        if response.message_type() == Some(MessageType::Acknowledgement) {
            if let Some(mid) = request.mid() {
                if response.mid() != Some(mid) {
                    response.set_mid(mid)?;
                }
            }
            request.set_acknowledged();
        }

        if response.is_confirmable() {
            self.start_retransmission(link, exchange, Outgoing::Response(response.clone()));
        }
        let result = link.send_response(exchange, response);
        if result.is_err() {
            exchange.cancel_retransmission();
        }
        result
    }

    fn send_empty_message(
        &self,
        link: &LayerLink<'_>,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        if let Some(exchange) = exchange {
            let request = exchange.current_request();
            match message.message_type() {
                Some(MessageType::Acknowledgement) if request.mid() == message.mid() => {
                    request.set_acknowledged()
                }
                Some(MessageType::Reset) if request.mid() == message.mid() => request.set_rejected(),
                _ => {}
            }
        }
        link.send_empty_message(exchange, message)
    }

    fn receive_request(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
    ) -> StackResult<()> {
        if request.is_duplicate() {
            return self.handle_duplicate_request(link, exchange, request);
        }
        link.receive_request(exchange, request)
    }

    fn receive_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        let request = exchange.current_request();
        request.set_acknowledged();
        exchange.cancel_retransmission();

        if response.is_confirmable() {
            if exchange.request().is_canceled() {
                debug!(
                    event = events::RELIABILITY_DUPLICATE,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    "response to a canceled request; rejecting"
                );
                return link.send_empty_message(Some(exchange), &EmptyMessage::rst_for(response));
            }
            link.send_empty_message(Some(exchange), &EmptyMessage::ack_for(response))?;
        }

        if response.is_duplicate() {
            debug!(
                event = events::RELIABILITY_DUPLICATE,
                component = COMPONENT,
                exchange_id = exchange.id(),
                mid = fields::format_mid(response.mid()).as_str(),
                "duplicate response dropped"
            );
            return Ok(());
        }
        link.receive_response(exchange, response)
    }

    fn receive_empty_message(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        let request = exchange.current_request();
        let response = exchange
            .response()
            .filter(|response| response.mid() == message.mid());
        let answers_response = response.is_some();
        let target: Option<&MessageCore> = match response.as_ref() {
            Some(response) => Some(response),
            None if request.mid() == message.mid() => Some(&request),
            None => None,
        };
        let Some(target) = target else {
            debug!(
                component = COMPONENT,
                exchange_id = exchange.id(),
                mid = fields::format_mid(message.mid()).as_str(),
                "empty message matches neither current request nor response"
            );
            return link.receive_empty_message(exchange, message);
        };

        let mut complete = false;
        match message.message_type() {
            Some(MessageType::Acknowledgement) => {
                target.set_acknowledged();
                exchange.cancel_retransmission();
                complete = exchange.origin() == Origin::Remote
                    && answers_response
                    && !exchange.has_active_relation();
            }
            Some(MessageType::Reset) => {
                target.set_rejected();
                exchange.cancel_retransmission();
                complete = exchange.origin() == Origin::Remote;
            }
            _ => {}
        }

        let result = link.receive_empty_message(exchange, message);
        if complete {
            exchange.set_complete();
        }
        result
    }
}

fn schedule_retransmission(
    link: &LayerLink<'_>,
    exchange: &Exchange,
    message: Outgoing,
    params: TransmissionParams,
) {
    let Some(executor) = link.executor() else {
        return;
    };
    let timeout = exchange.with_retransmission(|state| state.timeout);
    let stack: Weak<ProtocolStack> = Arc::downgrade(link.stack());
    let index = link.index();
    let weak_exchange = exchange.downgrade();

    let timer = executor.schedule(
        timeout,
        Box::new(move || {
            let (Some(stack), Some(exchange)) = (stack.upgrade(), weak_exchange.upgrade()) else {
                return;
            };
            retransmit(&LayerLink::new(&stack, index), &exchange, message, params);
        }),
    );
    let previous = exchange.with_retransmission(|state| state.timer.replace(timer));
    if let Some(previous) = previous {
        previous.cancel();
    }
    // Completion may have raced the scheduling above.
    if exchange.is_complete() {
        exchange.cancel_retransmission();
    }
}

fn retransmit(link: &LayerLink<'_>, exchange: &Exchange, message: Outgoing, params: TransmissionParams) {
    let core = message.core();
    if exchange.is_complete() || core.is_acknowledged() || core.is_rejected() || core.is_canceled() {
        return;
    }

    let attempt = exchange.increment_failed_transmission_count();
    if attempt > params.max_retransmit {
        warn!(
            event = events::RELIABILITY_TIMEOUT,
            component = COMPONENT,
            exchange_id = exchange.id(),
            mid = fields::format_mid(core.mid()).as_str(),
            attempts = attempt - 1,
            "retransmissions exhausted"
        );
        core.set_timed_out();
        exchange.set_complete();
        return;
    }

    exchange.with_retransmission(|state| {
        state.timeout = state.timeout.mul_f64(params.ack_timeout_scale);
    });
    debug!(
        event = events::RELIABILITY_RETRANSMIT,
        component = COMPONENT,
        exchange_id = exchange.id(),
        mid = fields::format_mid(core.mid()).as_str(),
        attempt,
        "retransmitting"
    );
    core.notify_retransmission();
    schedule_retransmission(link, exchange, message.clone(), params);

    let result = match &message {
        Outgoing::Request(request) => link.send_request(exchange, request),
        Outgoing::Response(response) => link.send_response(exchange, response),
    };
    if let Err(err) = result {
        warn!(
            event = events::STACK_TASK_FAILED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            err = %err,
            "retransmission failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Code, EndpointContext};
    use crate::stack::test_harness::Harness;
    use std::net::SocketAddr;

    fn peer() -> EndpointContext {
        EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)))
    }

    fn config() -> EndpointConfig {
        EndpointConfig {
            ack_timeout_ms: 100,
            ack_random_factor: 1.0,
            max_retransmit: 2,
            ..EndpointConfig::default()
        }
    }

    #[test]
    fn initial_timeout_stays_in_range() {
        let params = TransmissionParams {
            ack_timeout: Duration::from_millis(2_000),
            ack_random_factor: 1.5,
            ack_timeout_scale: 2.0,
            max_retransmit: 4,
        };
        for _ in 0..100 {
            let timeout = params.initial_timeout();
            assert!(timeout >= Duration::from_millis(2_000));
            assert!(timeout <= Duration::from_millis(3_000));
        }
    }

    #[test]
    fn confirmable_request_times_out_after_max_retransmit() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer());
        let exchange = harness.send_request(&request);
        assert_eq!(harness.sent_count(), 1);

        harness.advance(Duration::from_millis(100));
        harness.advance(Duration::from_millis(200));
        assert_eq!(harness.sent_count(), 3);
        assert_eq!(exchange.failed_transmission_count(), 2);

        harness.advance(Duration::from_millis(400));
        assert_eq!(harness.sent_count(), 3);
        assert!(request.is_timed_out());
        assert_eq!(request.send_error(), Some(crate::error::SendError::Timeout));
        assert!(exchange.is_complete());
        assert!(harness.store.is_empty());
    }

    #[test]
    fn acknowledgement_stops_retransmission() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer());
        let exchange = harness.send_request(&request);

        let ack = harness.inbound_empty(MessageType::Acknowledgement, request.mid().expect("mid assigned"));
        harness
            .stack
            .receive_empty_message(&exchange, &ack)
            .expect("ack should be processed");

        assert!(request.is_acknowledged());
        harness.advance(Duration::from_secs(10));
        assert_eq!(harness.sent_count(), 1);
        assert!(!exchange.is_complete());
    }

    #[test]
    fn untyped_response_is_piggybacked_on_confirmable_request() {
        let harness = Harness::udp(config());
        let request = harness.inbound_request(MessageType::Confirmable, 77);
        let exchange = Exchange::new_remote(request.clone());
        let response = Response::for_request(&request, Code::CONTENT);

        harness
            .stack
            .send_response(&exchange, &response)
            .expect("response should send");

        assert_eq!(response.message_type(), Some(MessageType::Acknowledgement));
        assert_eq!(response.mid(), Some(77));
        assert!(request.is_acknowledged());
        assert!(exchange.is_complete());
    }

    #[test]
    fn response_after_empty_ack_is_confirmable() {
        let harness = Harness::udp(config());
        let request = harness.inbound_request(MessageType::Confirmable, 78);
        let exchange = Exchange::new_remote(request.clone());
        request.set_acknowledged();
        let response = Response::for_request(&request, Code::CONTENT);

        harness
            .stack
            .send_response(&exchange, &response)
            .expect("response should send");

        assert_eq!(response.message_type(), Some(MessageType::Confirmable));
        assert!(!exchange.is_complete());
        harness.advance(Duration::from_millis(100));
        assert_eq!(harness.sent_count(), 2);

        let ack = harness.inbound_empty(
            MessageType::Acknowledgement,
            response.mid().expect("mid assigned"),
        );
        harness
            .stack
            .receive_empty_message(&exchange, &ack)
            .expect("ack should be processed");
        assert!(exchange.is_complete());
    }

    #[test]
    fn non_confirmable_request_gets_non_confirmable_response() {
        let harness = Harness::udp(config());
        let request = harness.inbound_request(MessageType::NonConfirmable, 79);
        let exchange = Exchange::new_remote(request.clone());
        let response = Response::for_request(&request, Code::CONTENT);

        harness
            .stack
            .send_response(&exchange, &response)
            .expect("response should send");

        assert_eq!(response.message_type(), Some(MessageType::NonConfirmable));
        assert_ne!(response.mid(), Some(79));
    }

    #[test]
    fn duplicate_request_resends_current_response() {
        let harness = Harness::udp(config());
        let request = harness.inbound_request(MessageType::Confirmable, 80);
        let exchange = Exchange::new_remote(request.clone());
        let response = Response::for_request(&request, Code::CONTENT);
        harness
            .stack
            .send_response(&exchange, &response)
            .expect("response should send");

        let duplicate = harness.inbound_request(MessageType::Confirmable, 80);
        duplicate.set_duplicate(true);
        harness
            .stack
            .receive_request(&exchange, &duplicate)
            .expect("duplicate should be handled");

        assert_eq!(harness.sent_count(), 2);
        assert_eq!(harness.delivered_requests(), 0);
    }

    #[test]
    fn confirmable_response_is_acknowledged() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer());
        let exchange = harness.send_request(&request);
        let response = harness.inbound_response(
            MessageType::Confirmable,
            900,
            request.token().expect("token assigned"),
        );

        harness
            .stack
            .receive_response(&exchange, &response)
            .expect("response should be processed");

        // Request plus the empty ACK for the separate response.
        assert_eq!(harness.sent_count(), 2);
        assert!(exchange.is_complete());
        assert_eq!(harness.delivered_responses(), 1);
    }
}
