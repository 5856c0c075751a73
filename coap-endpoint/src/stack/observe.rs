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

//! Resource observation (RFC 7641) for both roles.

use super::{Layer, LayerLink, StackResult};
use crate::config::EndpointConfig;
use crate::control_plane::NotificationListener;
use crate::exchange::{Exchange, ExchangeObserver, Origin};
use crate::matching::{NotificationOrder, ObservationStore};
use crate::message::options::MAX_OBSERVE_SEQUENCE;
use crate::message::{Code, EmptyMessage, MessageType, Request, Response, Token};
use crate::observability::{events, fields};
use crate::runtime::listener_list::ListenerList;
use crate::runtime::lock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, Level};

const COMPONENT: &str = "observe";

struct RelationState {
    canceled: AtomicBool,
    established: AtomicBool,
    sequence: AtomicU32,
    notifications: AtomicU32,
    last_confirmable: Mutex<Instant>,
}

/// Server-side observe relation carried by the exchange of the registering request.
#[derive(Clone)]
pub(crate) struct ObserveRelation(Arc<RelationState>);

impl ObserveRelation {
    fn new() -> Self {
        ObserveRelation(Arc::new(RelationState {
            canceled: AtomicBool::new(false),
            established: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            notifications: AtomicU32::new(0),
            last_confirmable: Mutex::new(Instant::now()),
        }))
    }

    /// Established by a first success response and not canceled since.
    pub(crate) fn is_active(&self) -> bool {
        self.0.established.load(Ordering::SeqCst) && !self.is_canceled()
    }

    fn is_established(&self) -> bool {
        self.0.established.load(Ordering::SeqCst)
    }

    fn mark_established(&self) {
        self.0.established.store(true, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::SeqCst)
    }

    /// Returns `false` when the relation was already canceled.
    fn cancel(&self) -> bool {
        !self.0.canceled.swap(true, Ordering::SeqCst)
    }

    fn next_sequence(&self) -> u32 {
        self.0.sequence.fetch_add(1, Ordering::SeqCst) & MAX_OBSERVE_SEQUENCE
    }

    /// NON by default; CON every `count_limit` notifications or once `interval`
    /// passed since the last confirmable one.
    fn next_notification_type(&self, count_limit: u32, interval: Duration) -> MessageType {
        let count = self.0.notifications.fetch_add(1, Ordering::SeqCst) + 1;
        let mut last_confirmable = lock(&self.0.last_confirmable);
        let due_by_count = count_limit > 0 && count % count_limit == 0;
        if due_by_count || last_confirmable.elapsed() >= interval {
            *last_confirmable = Instant::now();
            MessageType::Confirmable
        } else {
            MessageType::NonConfirmable
        }
    }
}

type RelationKey = (SocketAddr, Token);
type RelationMap = Mutex<HashMap<RelationKey, Exchange>>;

fn relation_key(request: &Request) -> Option<RelationKey> {
    Some((request.source()?.peer(), request.token().unwrap_or_default()))
}

/// Cancels the relation and forgets it once its exchange completes.
struct RelationCleanup {
    relations: Weak<RelationMap>,
    key: RelationKey,
}

impl ExchangeObserver for RelationCleanup {
    fn completed(&self, exchange: &Exchange) {
        if let Some(relation) = lock(exchange.relation()).as_ref() {
            relation.cancel();
        }
        let Some(relations) = self.relations.upgrade() else {
            return;
        };
        let mut relations = lock(&relations);
        if relations
            .get(&self.key)
            .is_some_and(|registered| registered.ptr_eq(exchange))
        {
            relations.remove(&self.key);
        }
    }
}

pub(crate) struct ObserveLayer {
    relations: Arc<RelationMap>,
    observations: Arc<dyn ObservationStore>,
    listeners: Arc<ListenerList<dyn NotificationListener>>,
    check_interval_count: u32,
    check_interval: Duration,
}

impl ObserveLayer {
    pub(crate) fn new(
        config: &EndpointConfig,
        observations: Arc<dyn ObservationStore>,
        listeners: Arc<ListenerList<dyn NotificationListener>>,
    ) -> Self {
        Self {
            relations: Arc::new(Mutex::new(HashMap::new())),
            observations,
            listeners,
            check_interval_count: config.notification_check_interval_count,
            check_interval: config.notification_check_interval(),
        }
    }

    fn establish(&self, exchange: &Exchange, key: RelationKey) {
        *lock(exchange.relation()) = Some(ObserveRelation::new());
        let previous = lock(&self.relations).insert(key.clone(), exchange.clone());
        if let Some(previous) = previous.filter(|previous| !previous.ptr_eq(exchange)) {
            cancel_relation(&previous);
            previous.set_complete();
        }
        exchange.add_observer(Arc::new(RelationCleanup {
            relations: Arc::downgrade(&self.relations),
            key: key.clone(),
        }));
        debug!(
            event = events::OBSERVE_RELATION_ESTABLISHED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            peer = %key.0,
            token = %key.1,
            "observe relation registered"
        );
    }

    fn deregister(&self, key: &RelationKey) {
        let existing = lock(&self.relations).remove(key);
        if let Some(existing) = existing {
            debug!(
                event = events::OBSERVE_RELATION_CANCELED,
                component = COMPONENT,
                exchange_id = existing.id(),
                reason = "deregistered",
                "observe relation removed"
            );
            cancel_relation(&existing);
            existing.set_complete();
        }
    }

    fn forget(&self, exchange: &Exchange, reason: &'static str) {
        if !cancel_relation(exchange) {
            return;
        }
        debug!(
            event = events::OBSERVE_RELATION_CANCELED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            reason,
            "observe relation canceled"
        );
        if let Some(key) = relation_key(&exchange.request()) {
            let mut relations = lock(&self.relations);
            if relations
                .get(&key)
                .is_some_and(|registered| registered.ptr_eq(exchange))
            {
                relations.remove(&key);
            }
        }
    }

    fn receive_notification(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        let request = exchange.request();
        let token = response.token().unwrap_or_default();

        if request.is_canceled() {
            // Confirmable notifications were already reset below.
            if response.message_type() == Some(MessageType::NonConfirmable) {
                link.send_empty_message(Some(exchange), &EmptyMessage::rst_for(response))?;
            }
            self.observations.remove(&token);
            exchange.set_complete();
            return Ok(());
        }

        let sequence = response.with_options_ref(|options| options.observe).unwrap_or_default();
        if !self
            .observations
            .record_notification(&token, NotificationOrder::new(sequence))
        {
            debug!(
                event = events::OBSERVE_STALE_NOTIFICATION,
                component = COMPONENT,
                exchange_id = exchange.id(),
                sequence,
                "dropping out-of-order notification"
            );
            return Ok(());
        }

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                event = events::OBSERVE_NOTIFICATION,
                component = COMPONENT,
                exchange_id = exchange.id(),
                sequence,
                token = fields::format_token(Some(&token)).as_str(),
                "notification received"
            );
        }
        for listener in self.listeners.snapshot().iter() {
            listener.on_notification(&request, response);
        }
        link.receive_response(exchange, response)
    }
}

/// Returns `true` if this call canceled a live relation.
fn cancel_relation(exchange: &Exchange) -> bool {
    lock(exchange.relation())
        .as_ref()
        .is_some_and(ObserveRelation::cancel)
}

fn is_observable(code: Code) -> bool {
    code == Code::GET || code == Code::FETCH
}

impl Layer for ObserveLayer {
    fn send_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        let relation = lock(exchange.relation()).clone();
        let Some(relation) = relation.filter(|relation| !relation.is_canceled()) else {
            return link.send_response(exchange, response);
        };

        if !response.code().is_success() {
            self.forget(exchange, "error_response");
            return link.send_response(exchange, response);
        }

        response.update_options(|options| options.observe = Some(relation.next_sequence()))?;
        if relation.is_established() {
            if response.message_type().is_none() {
                response.set_type(
                    relation.next_notification_type(self.check_interval_count, self.check_interval),
                )?;
            }
        } else {
            relation.mark_established();
        }
        link.send_response(exchange, response)
    }

    fn receive_request(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        request: &Request,
    ) -> StackResult<()> {
        if is_observable(request.code()) {
            if let Some(key) = relation_key(request) {
                if request.is_observe() {
                    self.establish(exchange, key);
                } else if request.is_observe_cancel() {
                    self.deregister(&key);
                }
            }
        }
        link.receive_request(exchange, request)
    }

    fn receive_response(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        response: &Response,
    ) -> StackResult<()> {
        if exchange.origin() != Origin::Local || !exchange.request().is_observe() {
            return link.receive_response(exchange, response);
        }
        if response.is_notification() {
            return self.receive_notification(link, exchange, response);
        }
        // The server ended the observation with a plain response.
        let token = response.token().unwrap_or_default();
        self.observations.remove(&token);
        link.receive_response(exchange, response)
    }

    fn receive_empty_message(
        &self,
        link: &LayerLink<'_>,
        exchange: &Exchange,
        message: &EmptyMessage,
    ) -> StackResult<()> {
        if message.message_type() == Some(MessageType::Reset) && exchange.origin() == Origin::Remote {
            self.forget(exchange, "reset");
        }
        link.receive_empty_message(exchange, message)
    }

    fn clear(&self) {
        let relations: Vec<Exchange> = lock(&self.relations).drain().map(|(_, exchange)| exchange).collect();
        for exchange in relations {
            cancel_relation(&exchange);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::CleanupObserver;
    use crate::matching::Matcher;
    use crate::message::Message;
    use crate::stack::test_harness::{peer, Harness};
    use std::sync::atomic::AtomicUsize;

    fn config() -> EndpointConfig {
        EndpointConfig {
            notification_check_interval_count: 2,
            ..EndpointConfig::default()
        }
    }

    fn observe_request(harness: &Harness, mid: u16, observe: u32) -> Request {
        let request = harness.inbound_request(MessageType::Confirmable, mid);
        request
            .update_options(|options| options.observe = Some(observe))
            .expect("fresh request");
        request
    }

    fn register(harness: &Harness, mid: u16) -> (Request, Exchange) {
        let request = observe_request(harness, mid, 0);
        let exchange = Exchange::new_remote(request.clone());
        harness
            .stack
            .receive_request(&exchange, &request)
            .expect("registration should be processed");
        (request, exchange)
    }

    fn notify(harness: &Harness, exchange: &Exchange, request: &Request, code: Code) -> Response {
        let response = Response::for_request(request, code);
        harness
            .stack
            .send_response(exchange, &response)
            .expect("notification should send");
        response
    }

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl NotificationListener for CountingListener {
        fn on_notification(&self, _request: &Request, _response: &Response) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notification(harness: &Harness, mid: u16, token: Token, sequence: u32) -> Response {
        let response = harness.inbound_response(MessageType::NonConfirmable, mid, token);
        response
            .update_options(|options| options.observe = Some(sequence))
            .expect("fresh response");
        response
    }

    #[test]
    fn confirmable_every_count_limit_notifications() {
        let relation = ObserveRelation::new();
        let day = Duration::from_secs(86_400);

        assert_eq!(relation.next_notification_type(3, day), MessageType::NonConfirmable);
        assert_eq!(relation.next_notification_type(3, day), MessageType::NonConfirmable);
        assert_eq!(relation.next_notification_type(3, day), MessageType::Confirmable);
        assert_eq!(
            relation.next_notification_type(3, Duration::ZERO),
            MessageType::Confirmable
        );
    }

    #[test]
    fn notifications_carry_increasing_sequence_numbers() {
        let harness = Harness::udp(config());
        let (request, exchange) = register(&harness, 30);
        assert_eq!(harness.delivered_requests(), 1);

        let first = notify(&harness, &exchange, &request, Code::CONTENT);
        assert_eq!(first.message_type(), Some(MessageType::Acknowledgement));
        assert!(exchange.has_active_relation());
        assert!(!exchange.is_complete());

        let second = notify(&harness, &exchange, &request, Code::CONTENT);
        let third = notify(&harness, &exchange, &request, Code::CONTENT);
        assert_eq!(second.message_type(), Some(MessageType::NonConfirmable));
        assert_eq!(third.message_type(), Some(MessageType::Confirmable));

        let sequences: Vec<u32> = [&first, &second, &third]
            .iter()
            .filter_map(|response| response.options().observe)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(!exchange.is_complete());
    }

    #[test]
    fn error_response_ends_relation() {
        let harness = Harness::udp(config());
        let (request, exchange) = register(&harness, 31);

        let response = notify(&harness, &exchange, &request, Code::NOT_FOUND);

        assert!(!response.is_notification());
        assert!(!exchange.has_active_relation());
        assert!(exchange.is_complete());
    }

    #[test]
    fn observe_one_deregisters() {
        let harness = Harness::udp(config());
        let (request, exchange) = register(&harness, 32);
        notify(&harness, &exchange, &request, Code::CONTENT);

        let cancel = observe_request(&harness, 33, 1);
        harness
            .stack
            .receive_request(&Exchange::new_remote(cancel.clone()), &cancel)
            .expect("deregistration should be processed");

        assert!(!exchange.has_active_relation());
        assert!(exchange.is_complete());
    }

    #[test]
    fn reset_cancels_relation() {
        let harness = Harness::udp(EndpointConfig {
            notification_check_interval_count: 1,
            ..EndpointConfig::default()
        });
        let (request, exchange) = register(&harness, 34);
        notify(&harness, &exchange, &request, Code::CONTENT);
        let confirmable = notify(&harness, &exchange, &request, Code::CONTENT);
        assert_eq!(confirmable.message_type(), Some(MessageType::Confirmable));

        let reset = harness.inbound_empty(MessageType::Reset, confirmable.mid().expect("mid assigned"));
        harness
            .stack
            .receive_empty_message(&exchange, &reset)
            .expect("reset should be processed");

        assert!(!exchange.has_active_relation());
        assert!(exchange.is_complete());
    }

    #[test]
    fn client_drops_stale_notifications() {
        let harness = Harness::udp(config());
        let listener = Arc::new(CountingListener::default());
        harness.notification_listeners.add(listener.clone());
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = harness.send_request(&request);
        let token = request.token().expect("token assigned");
        assert_eq!(harness.observations.len(), 1);

        for (mid, sequence) in [(500, 5), (501, 4), (502, 6)] {
            harness
                .stack
                .receive_response(&exchange, &notification(&harness, mid, token.clone(), sequence))
                .expect("notification should be processed");
        }

        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
        assert_eq!(harness.delivered_responses(), 2);
        assert!(!exchange.is_complete());
    }

    #[test]
    fn plain_response_ends_client_observation() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = harness.send_request(&request);
        let token = request.token().expect("token assigned");

        let response = harness.inbound_response(MessageType::NonConfirmable, 600, token);
        harness
            .stack
            .receive_response(&exchange, &response)
            .expect("response should be processed");

        assert!(harness.observations.is_empty());
        assert!(exchange.is_complete());
    }

    #[test]
    fn canceled_observation_resets_notification() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = harness.send_request(&request);
        let token = request.token().expect("token assigned");
        request.cancel();

        harness
            .stack
            .receive_response(&exchange, &notification(&harness, 700, token, 1))
            .expect("notification should be processed");

        let Some(Message::Empty(reset)) = harness.sent_messages().pop() else {
            panic!("expected a reset");
        };
        assert_eq!(reset.message_type(), Some(MessageType::Reset));
        assert_eq!(reset.mid(), Some(700));
        assert!(exchange.is_complete());
        assert_eq!(harness.delivered_responses(), 0);
    }

    #[test]
    fn unanswered_observe_request_leaves_no_observation() {
        let harness = Harness::udp(EndpointConfig {
            ack_timeout_ms: 100,
            ack_random_factor: 1.0,
            max_retransmit: 1,
            ..config()
        });
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = harness.send_request(&request);
        let token = request.token().expect("token assigned");
        assert_eq!(harness.observations.len(), 1);

        harness.advance(Duration::from_secs(600));

        assert!(request.is_timed_out());
        assert!(exchange.is_complete());
        assert!(harness.observations.is_empty());
        assert!(harness.store.is_empty());
        let late = notification(&harness, 800, token, 3);
        assert!(harness.matcher.receive_response(&late).is_none());
    }

    #[test]
    fn rejected_observe_request_leaves_no_observation() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = Exchange::new_local(request.clone());
        CleanupObserver::attach(&exchange, &request);
        harness
            .stack
            .send_request(&exchange, &request)
            .expect("request should enter the stack");

        let reset = harness.inbound_empty(MessageType::Reset, request.mid().expect("mid assigned"));
        harness
            .stack
            .receive_empty_message(&exchange, &reset)
            .expect("reset should be processed");

        assert!(request.is_rejected());
        assert!(exchange.is_complete());
        assert!(harness.observations.is_empty());
        assert!(harness.store.is_empty());
    }

    #[test]
    fn established_observation_survives_exchange_completion() {
        let harness = Harness::udp(config());
        let request = Request::get().with_destination(peer()).with_observe();
        let exchange = harness.send_request(&request);
        let token = request.token().expect("token assigned");
        harness
            .stack
            .receive_response(&exchange, &notification(&harness, 900, token.clone(), 1))
            .expect("notification should be processed");

        // The matcher lost the exchange; the observation still restores one.
        exchange.set_complete();

        assert!(harness.observations.get(&token).is_some());
    }
}
