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

//! Exchange matching layer.
//!
//! Owns the token and message-ID registries that correlate inbound datagrams
//! with open exchanges, the duplicate detector and the client-side observation
//! store. Lookups never fail: absence is reported as `None`.
//!
//! ```
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use coap_endpoint::config::EndpointConfig;
//! use coap_endpoint::exchange::Exchange;
//! use coap_endpoint::matching::{InMemoryObservationStore, Matcher, UdpMatcher};
//! use coap_endpoint::message::{EndpointContext, Request};
//!
//! let matcher = UdpMatcher::new(
//!     &EndpointConfig::default(),
//!     Arc::new(InMemoryObservationStore::new()),
//! );
//! let peer = EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5683)));
//! let request = Request::get().with_destination(peer);
//! let exchange = Exchange::new_local(request.clone());
//!
//! matcher.send_request(&exchange, &request).unwrap();
//!
//! // The matcher finalized both identifiers before the request can be frozen.
//! assert!(request.mid().is_some());
//! let token = request.token().unwrap();
//! assert!(matcher.store().find_by_token(&token).is_some());
//!
//! exchange.set_complete();
//! assert!(matcher.store().find_by_token(&token).is_none());
//! ```

mod exchange_store;
mod keys;
mod observation_store;
mod tcp_matcher;
mod udp_matcher;

pub use exchange_store::ExchangeStore;
pub use keys::KeyMid;
pub use observation_store::{
    InMemoryObservationStore, NotificationOrder, Observation, ObservationStore,
};
pub use tcp_matcher::TcpMatcher;
pub use udp_matcher::UdpMatcher;

use crate::exchange::{Exchange, ExchangeObserver};
use crate::message::{EmptyMessage, EndpointContext, MessageError, Request, Response, Token};
use crate::observability::{events, fields};
use crate::runtime::Executor;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::debug;

const COMPONENT: &str = "matcher";

/// Correlates outbound messages with exchanges and inbound messages back to them.
///
/// All methods are called from the protocol stage except `cancel_observe`,
/// which applications may call from any thread.
pub trait Matcher: Send + Sync {
    /// Starts background housekeeping on `executor`.
    fn start(&self, executor: Arc<dyn Executor>);

    fn stop(&self);

    /// Forgets every registered exchange. Observations survive.
    fn clear(&self);

    /// Assigns a message ID and token when absent and registers the exchange.
    ///
    /// Fails with [`MatchError::TokenInUse`] when another open exchange already
    /// owns the request's token.
    fn send_request(&self, exchange: &Exchange, request: &Request) -> Result<(), MatchError>;

    fn send_response(&self, exchange: &Exchange, response: &Response) -> Result<(), MatchError>;

    fn send_empty_message(
        &self,
        exchange: Option<&Exchange>,
        message: &EmptyMessage,
    ) -> Result<(), MatchError>;

    /// Returns the exchange for an inbound request, creating a remote one for
    /// fresh requests. Duplicates come back flagged on the request.
    fn receive_request(&self, request: &Request) -> Exchange;

    fn receive_response(&self, response: &Response) -> Option<Exchange>;

    fn receive_empty_message(&self, message: &EmptyMessage) -> Option<Exchange>;

    /// Drops the observation for `token` and completes the exchange tracking it.
    fn cancel_observe(&self, token: &Token);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MatchError {
    /// The token is registered for a different open exchange.
    TokenInUse(Token),
    MissingDestination,
    Message(MessageError),
}

impl Display for MatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchError::TokenInUse(token) => write!(f, "token {token} is already in use"),
            MatchError::MissingDestination => write!(f, "message has no destination context"),
            MatchError::Message(err) => write!(f, "message update failed: {err}"),
        }
    }
}

impl Error for MatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MatchError::Message(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MessageError> for MatchError {
    fn from(err: MessageError) -> Self {
        MatchError::Message(err)
    }
}

/// Stores an observation for observe-registering requests sent on `exchange`.
///
/// The observation only outlives the exchange once a notification arrived.
fn register_observation(
    observations: &Arc<dyn ObservationStore>,
    exchange: &Exchange,
    token: &Token,
) {
    let request = exchange.request();
    if !request.is_observe() || observations.get(token).is_some() {
        return;
    }
    observations.put(token.clone(), Observation::new(request));
    exchange.add_observer(Arc::new(ForgetUnestablishedObservation {
        observations: observations.clone(),
        token: token.clone(),
    }));
}

/// Drops the observation of an exchange that ended before the relation was
/// established, or whose request failed.
struct ForgetUnestablishedObservation {
    observations: Arc<dyn ObservationStore>,
    token: Token,
}

impl ExchangeObserver for ForgetUnestablishedObservation {
    fn completed(&self, exchange: &Exchange) {
        let Some(observation) = self.observations.get(&self.token) else {
            return;
        };
        let failed = [exchange.request(), exchange.current_request()]
            .iter()
            .any(|request| request.is_canceled() || request.is_timed_out() || request.is_rejected());
        if !failed && observation.last_notification().is_some() {
            return;
        }
        self.observations.remove(&self.token);
        debug!(
            event = events::OBSERVE_RELATION_CANCELED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            token = %self.token,
            "observation dropped with its exchange"
        );
    }
}

/// Whether `received` may answer the request currently on `exchange`.
fn response_context_matches(exchange: &Exchange, received: &EndpointContext) -> bool {
    let expected = exchange
        .endpoint_context()
        .or_else(|| exchange.current_request().destination());
    match expected {
        Some(expected) => expected.matches_response_context(received),
        None => true,
    }
}

/// Rebuilds an exchange for a notification whose original exchange is gone,
/// for instance after the matcher was cleared.
fn observation_exchange(
    store: &ExchangeStore,
    observations: &dyn ObservationStore,
    token: &Token,
    source: &EndpointContext,
) -> Option<Exchange> {
    let observation = observations.get(token)?;
    let request = observation.request().clone();
    if request
        .destination()
        .is_some_and(|destination| destination.peer() != source.peer())
    {
        return None;
    }

    let exchange = Exchange::new_local(request.clone());
    store.register_token(&exchange, &request).ok()?;
    debug!(
        event = events::OBSERVE_NOTIFICATION,
        component = COMPONENT,
        token = %token,
        peer = %source.peer(),
        "restored exchange from observation"
    );
    Some(exchange)
}

fn cancel_observation(store: &ExchangeStore, observations: &dyn ObservationStore, token: &Token) {
    if observations.remove(token).is_some() {
        debug!(
            event = events::OBSERVE_RELATION_CANCELED,
            component = COMPONENT,
            token = %token,
            "observation removed"
        );
    }
    if let Some(exchange) = store.find_by_token(token) {
        let request = exchange.request();
        if request.is_observe() {
            request.cancel();
            exchange.set_complete();
        }
    }
}

fn log_context_mismatch(response: &Response, exchange: &Exchange) {
    debug!(
        event = events::MATCHER_CONTEXT_MISMATCH,
        component = COMPONENT,
        exchange_id = exchange.id(),
        token = fields::format_token(response.token().as_ref()).as_str(),
        peer = fields::format_peer(response.source().as_ref()).as_str(),
        "ignoring response from unexpected endpoint context"
    );
}
