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

use super::{
    cancel_observation, log_context_mismatch, observation_exchange, register_observation,
    response_context_matches, ExchangeStore, MatchError, Matcher, ObservationStore,
};
use crate::config::EndpointConfig;
use crate::exchange::Exchange;
use crate::message::{EmptyMessage, Request, Response, Token};
use crate::runtime::Executor;
use std::sync::Arc;

/// Matcher for reliable stream transports. Matching is by token only; the
/// transport already removes duplicates and there are no message IDs.
pub struct TcpMatcher {
    store: Arc<ExchangeStore>,
    observations: Arc<dyn ObservationStore>,
}

impl TcpMatcher {
    pub fn new(config: &EndpointConfig, observations: Arc<dyn ObservationStore>) -> Self {
        Self {
            store: ExchangeStore::new(config),
            observations,
        }
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }
}

impl Matcher for TcpMatcher {
    fn start(&self, _executor: Arc<dyn Executor>) {}

    fn stop(&self) {}

    fn clear(&self) {
        self.store.clear();
    }

    fn send_request(&self, exchange: &Exchange, request: &Request) -> Result<(), MatchError> {
        if request.destination().is_none() {
            return Err(MatchError::MissingDestination);
        }
        let token = self.store.register_token(exchange, request)?;
        register_observation(&self.observations, exchange, &token);
        Ok(())
    }

    fn send_response(&self, exchange: &Exchange, response: &Response) -> Result<(), MatchError> {
        if response.token().is_none() {
            response.set_token(exchange.current_request().token().unwrap_or_default())?;
        }
        if !response.is_notification() {
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
        Ok(())
    }

    fn receive_request(&self, request: &Request) -> Exchange {
        Exchange::new_remote(request.clone())
    }

    fn receive_response(&self, response: &Response) -> Option<Exchange> {
        let source = response.source()?;
        let token = response.token().unwrap_or_default();
        match self.store.find_by_token(&token) {
            Some(exchange) if response_context_matches(&exchange, &source) => Some(exchange),
            Some(exchange) => {
                log_context_mismatch(response, &exchange);
                None
            }
            None => observation_exchange(&self.store, self.observations.as_ref(), &token, &source),
        }
    }

    fn receive_empty_message(&self, _message: &EmptyMessage) -> Option<Exchange> {
        None
    }

    fn cancel_observe(&self, token: &Token) {
        cancel_observation(&self.store, self.observations.as_ref(), token);
    }
}
