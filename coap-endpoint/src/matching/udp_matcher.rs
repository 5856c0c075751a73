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

use super::exchange_store::DeduplicatorSweep;
use super::{
    cancel_observation, log_context_mismatch, observation_exchange, register_observation,
    response_context_matches, ExchangeStore, KeyMid, MatchError, Matcher, ObservationStore,
    COMPONENT,
};
use crate::config::EndpointConfig;
use crate::exchange::Exchange;
use crate::message::{EmptyMessage, MessageCore, MessageType, Request, Response, Token};
use crate::observability::{events, fields};
use crate::runtime::{lock, Executor};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Matcher for datagram transports: token plus message-ID matching and
/// duplicate detection.
pub struct UdpMatcher {
    store: Arc<ExchangeStore>,
    observations: Arc<dyn ObservationStore>,
    sweep_interval: Duration,
    sweep: Mutex<Option<Arc<DeduplicatorSweep>>>,
}

impl UdpMatcher {
    pub fn new(config: &EndpointConfig, observations: Arc<dyn ObservationStore>) -> Self {
        Self {
            store: ExchangeStore::new(config),
            observations,
            sweep_interval: config.mark_and_sweep_interval(),
            sweep: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    pub fn observations(&self) -> &Arc<dyn ObservationStore> {
        &self.observations
    }

    fn mark_duplicate(&self, message: &MessageCore, previous: &Exchange) {
        message.set_duplicate(true);
        debug!(
            event = events::MATCHER_DUPLICATE,
            component = COMPONENT,
            exchange_id = previous.id(),
            mid = fields::format_mid(message.mid()).as_str(),
            peer = fields::format_peer(message.source().as_ref()).as_str(),
            "duplicate message"
        );
    }
}

impl Matcher for UdpMatcher {
    fn start(&self, executor: Arc<dyn Executor>) {
        let mut sweep = lock(&self.sweep);
        if sweep.is_none() {
            *sweep = Some(DeduplicatorSweep::start(
                &self.store,
                executor,
                self.sweep_interval,
            ));
        }
    }

    fn stop(&self) {
        if let Some(sweep) = lock(&self.sweep).take() {
            sweep.stop();
        }
    }

    fn clear(&self) {
        self.store.clear();
    }

    fn send_request(&self, exchange: &Exchange, request: &Request) -> Result<(), MatchError> {
        let destination = request
            .destination()
            .ok_or(MatchError::MissingDestination)?;
        let mid = self.store.assign_mid(request)?;
        let token = self.store.register_token(exchange, request)?;
        if request.is_confirmable() {
            self.store
                .register_mid(exchange, KeyMid::new(mid, destination.peer()));
        }
        register_observation(&self.observations, exchange, &token);
        Ok(())
    }

    fn send_response(&self, exchange: &Exchange, response: &Response) -> Result<(), MatchError> {
        let destination = response
            .destination()
            .ok_or(MatchError::MissingDestination)?;
        if response.token().is_none() {
            response.set_token(exchange.current_request().token().unwrap_or_default())?;
        }
        let mid = self.store.assign_mid(response)?;

        let confirmable = response.message_type() == Some(MessageType::Confirmable);
        if confirmable || response.is_notification() {
            self.store
                .replace_mid(exchange, KeyMid::new(mid, destination.peer()));
        }
        if !confirmable && !response.is_notification() {
            exchange.set_complete();
        }
        Ok(())
    }

    fn send_empty_message(
        &self,
        _exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> Result<(), MatchError> {
        if message.token().is_none() {
            message.set_token(Token::empty())?;
        }
        self.store.assign_mid(message)?;
        Ok(())
    }

    fn receive_request(&self, request: &Request) -> Exchange {
        let exchange = Exchange::new_remote(request.clone());
        let Some(key) = KeyMid::from_inbound(request) else {
            return exchange;
        };
        match self.store.find_previous(key, &exchange) {
            Some(previous) => {
                self.mark_duplicate(request, &previous);
                previous
            }
            None => exchange,
        }
    }

    fn receive_response(&self, response: &Response) -> Option<Exchange> {
        let source = response.source()?;
        let token = response.token().unwrap_or_default();
        let key = response
            .mid()
            .map(|mid| KeyMid::new(mid, source.peer()));

        let Some(exchange) = self.store.find_by_token(&token) else {
            // A retransmitted response to an exchange that already completed.
            if let Some(previous) = key.and_then(|key| self.store.find_duplicate(&key)) {
                self.mark_duplicate(response, &previous);
                return Some(previous);
            }
            return observation_exchange(&self.store, self.observations.as_ref(), &token, &source);
        };

        if !response_context_matches(&exchange, &source) {
            log_context_mismatch(response, &exchange);
            return None;
        }

        if response.message_type() == Some(MessageType::Acknowledgement) {
            let request = exchange.current_request();
            if request.mid() != response.mid() {
                debug!(
                    event = events::MATCHER_MID_MISMATCH,
                    component = COMPONENT,
                    exchange_id = exchange.id(),
                    expected = fields::format_mid(request.mid()).as_str(),
                    mid = fields::format_mid(response.mid()).as_str(),
                    "piggybacked response does not acknowledge the current request"
                );
                return None;
            }
        } else if let Some(key) = key {
            if let Some(previous) = self.store.find_previous(key, &exchange) {
                self.mark_duplicate(response, &previous);
                return Some(previous);
            }
        }
        Some(exchange)
    }

    fn receive_empty_message(&self, message: &EmptyMessage) -> Option<Exchange> {
        let key = KeyMid::from_inbound(message)?;
        self.store.remove_by_mid(&key)
    }

    fn cancel_observe(&self, token: &Token) {
        cancel_observation(&self.store, self.observations.as_ref(), token);
    }
}
