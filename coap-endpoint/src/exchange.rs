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

//! Request/response exchange state shared by the matcher and the stack stages.

use crate::endpoint::{Endpoint, EndpointShared};
use crate::error::{EndpointError, SendError};
use crate::message::{BlockOption, EmptyMessage, EndpointContext, MessageObserver, Request, Response};
use crate::observability::events;
use crate::runtime::{lock, ScheduledTask};
use crate::stack::blockwise::BlockwiseStatus;
use crate::stack::observe::ObserveRelation;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

const COMPONENT: &str = "exchange";

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// Started by this endpoint (client role).
    Local,
    /// Started by a peer (server role).
    Remote,
}

/// Hook run exactly once when an exchange completes.
pub trait ExchangeObserver: Send + Sync {
    fn completed(&self, exchange: &Exchange);
}

/// Retransmission bookkeeping owned by the reliability stage.
#[derive(Debug, Default)]
pub(crate) struct RetransmissionState {
    pub(crate) timeout: Duration,
    pub(crate) timer: Option<ScheduledTask>,
}

struct ExchangeInner {
    id: u64,
    origin: Origin,
    request: Mutex<Request>,
    current_request: Mutex<Request>,
    response: Mutex<Option<Response>>,
    complete: AtomicBool,
    custom_executor: AtomicBool,
    store_cleanup: AtomicBool,
    failed_transmission_count: AtomicU32,
    retransmission: Mutex<RetransmissionState>,
    send_timestamp: Mutex<Option<Instant>>,
    endpoint: OnceLock<Weak<EndpointShared>>,
    endpoint_context: Mutex<Option<EndpointContext>>,
    block1: Mutex<Option<BlockwiseStatus>>,
    block2: Mutex<Option<BlockwiseStatus>>,
    block1_echo: Mutex<Option<BlockOption>>,
    relation: Mutex<Option<ObserveRelation>>,
    observers: Mutex<Vec<Arc<dyn ExchangeObserver>>>,
}

/// One logical request/response interaction.
///
/// Becomes complete exactly once; completion cancels pending retransmission and
/// runs every registered [`ExchangeObserver`].
#[derive(Clone)]
pub struct Exchange(Arc<ExchangeInner>);

impl Exchange {
    pub fn new_local(request: Request) -> Self {
        Self::new(request, Origin::Local)
    }

    pub fn new_remote(request: Request) -> Self {
        Self::new(request, Origin::Remote)
    }

    fn new(request: Request, origin: Origin) -> Self {
        Exchange(Arc::new(ExchangeInner {
            id: NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            request: Mutex::new(request.clone()),
            current_request: Mutex::new(request),
            response: Mutex::new(None),
            complete: AtomicBool::new(false),
            custom_executor: AtomicBool::new(false),
            store_cleanup: AtomicBool::new(false),
            failed_transmission_count: AtomicU32::new(0),
            retransmission: Mutex::new(RetransmissionState::default()),
            send_timestamp: Mutex::new(None),
            endpoint: OnceLock::new(),
            endpoint_context: Mutex::new(None),
            block1: Mutex::new(None),
            block2: Mutex::new(None),
            block1_echo: Mutex::new(None),
            relation: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn origin(&self) -> Origin {
        self.0.origin
    }

    /// The request this exchange answers; for blockwise uploads the reassembled body.
    pub fn request(&self) -> Request {
        lock(&self.0.request).clone()
    }

    pub(crate) fn set_request(&self, request: Request) {
        *lock(&self.0.request) = request;
    }

    /// The request currently on the wire (one block of a blockwise transfer).
    pub fn current_request(&self) -> Request {
        lock(&self.0.current_request).clone()
    }

    pub(crate) fn set_current_request(&self, request: Request) {
        *lock(&self.0.current_request) = request;
    }

    pub fn response(&self) -> Option<Response> {
        lock(&self.0.response).clone()
    }

    pub(crate) fn set_response(&self, response: Response) {
        *lock(&self.0.response) = Some(response);
    }

    pub fn is_complete(&self) -> bool {
        self.0.complete.load(Ordering::SeqCst)
    }

    /// Moves the exchange to Complete. Returns `false` if it already was.
    pub fn set_complete(&self) -> bool {
        if self.0.complete.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel_retransmission();
        debug!(
            event = events::EXCHANGE_COMPLETE,
            component = COMPONENT,
            exchange_id = self.0.id,
            origin = ?self.0.origin,
            "exchange complete"
        );

        let observers = std::mem::take(&mut *lock(&self.0.observers));
        for observer in observers {
            observer.completed(self);
        }
        true
    }

    /// Registers a completion hook. Runs it immediately when already complete.
    pub fn add_observer(&self, observer: Arc<dyn ExchangeObserver>) {
        {
            let mut observers = lock(&self.0.observers);
            if !self.is_complete() {
                observers.push(observer);
                return;
            }
        }
        observer.completed(self);
    }

    pub fn set_custom_executor(&self, custom: bool) {
        self.0.custom_executor.store(custom, Ordering::SeqCst);
    }

    /// Whether the application runs its own executor for this exchange.
    pub fn has_custom_executor(&self) -> bool {
        self.0.custom_executor.load(Ordering::SeqCst)
    }

    /// Returns `true` for the first caller only; the matcher uses it to hook
    /// store cleanup onto an exchange once however often it is registered.
    pub(crate) fn claim_store_cleanup(&self) -> bool {
        !self.0.store_cleanup.swap(true, Ordering::SeqCst)
    }

    pub fn failed_transmission_count(&self) -> u32 {
        self.0.failed_transmission_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_failed_transmission_count(&self) -> u32 {
        self.0.failed_transmission_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_failed_transmission_count(&self) {
        self.0.failed_transmission_count.store(0, Ordering::SeqCst);
    }

    pub(crate) fn with_retransmission<R>(&self, edit: impl FnOnce(&mut RetransmissionState) -> R) -> R {
        edit(&mut lock(&self.0.retransmission))
    }

    pub(crate) fn cancel_retransmission(&self) {
        let timer = lock(&self.0.retransmission).timer.take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    pub(crate) fn mark_sent_now(&self) {
        *lock(&self.0.send_timestamp) = Some(Instant::now());
    }

    /// Time since the current request was last handed to the connector.
    pub fn calculate_rtt(&self) -> Option<Duration> {
        lock(&self.0.send_timestamp).map(|sent| sent.elapsed())
    }

    /// Attaches the owning endpoint. Only the first call has an effect.
    pub(crate) fn set_endpoint(&self, endpoint: Weak<EndpointShared>) {
        let _ = self.0.endpoint.set(endpoint);
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.0
            .endpoint
            .get()
            .and_then(Weak::upgrade)
            .map(Endpoint::from_shared)
    }

    pub fn endpoint_context(&self) -> Option<EndpointContext> {
        lock(&self.0.endpoint_context).clone()
    }

    pub(crate) fn set_endpoint_context(&self, context: EndpointContext) {
        *lock(&self.0.endpoint_context) = Some(context);
    }

    pub(crate) fn block1_status(&self) -> &Mutex<Option<BlockwiseStatus>> {
        &self.0.block1
    }

    pub(crate) fn block2_status(&self) -> &Mutex<Option<BlockwiseStatus>> {
        &self.0.block2
    }

    pub(crate) fn block1_echo(&self) -> &Mutex<Option<BlockOption>> {
        &self.0.block1_echo
    }

    pub(crate) fn relation(&self) -> &Mutex<Option<ObserveRelation>> {
        &self.0.relation
    }

    /// Whether a server-side observe relation keeps this exchange open.
    pub fn has_active_relation(&self) -> bool {
        lock(&self.0.relation)
            .as_ref()
            .is_some_and(ObserveRelation::is_active)
    }

    /// Sends `response` for this exchange through the owning endpoint.
    ///
    /// A missing destination defaults to the source of the request.
    pub fn send_response(&self, response: Response) -> Result<(), EndpointError> {
        if response.destination().is_none() {
            if let Some(source) = self.request().source() {
                let _ = response.set_destination(source);
            }
        }
        let endpoint = self.endpoint().ok_or(EndpointError::Destroyed)?;
        endpoint.send_response(self, response)
    }

    /// Acknowledges a confirmable request with an empty ACK.
    pub fn send_accept(&self) -> Result<(), EndpointError> {
        let request = self.current_request();
        if self.origin() != Origin::Remote || !request.is_confirmable() || request.is_acknowledged() {
            return Ok(());
        }
        let endpoint = self.endpoint().ok_or(EndpointError::Destroyed)?;
        endpoint.send_empty_message(Some(self), EmptyMessage::ack_for(&request))
    }

    /// Rejects the current request with a reset.
    pub fn send_reject(&self) -> Result<(), EndpointError> {
        let request = self.current_request();
        request.set_rejected();
        let endpoint = self.endpoint().ok_or(EndpointError::Destroyed)?;
        endpoint.send_empty_message(Some(self), EmptyMessage::rst_for(&request))
    }

    pub fn ptr_eq(&self, other: &Exchange) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.0.id)
            .field("origin", &self.0.origin)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

/// Non-owning exchange handle for observers stored on the exchange's own messages.
#[derive(Clone)]
pub(crate) struct WeakExchange(Weak<ExchangeInner>);

impl WeakExchange {
    pub(crate) fn upgrade(&self) -> Option<Exchange> {
        self.0.upgrade().map(Exchange)
    }
}

impl Exchange {
    pub(crate) fn downgrade(&self) -> WeakExchange {
        WeakExchange(Arc::downgrade(&self.0))
    }
}

/// Completes a locally originated exchange when its request fails or is abandoned.
pub(crate) struct CleanupObserver {
    exchange: WeakExchange,
}

impl CleanupObserver {
    pub(crate) fn attach(exchange: &Exchange, request: &Request) {
        request.add_message_observer(Arc::new(CleanupObserver {
            exchange: exchange.downgrade(),
        }));
    }

    fn complete(&self) {
        if let Some(exchange) = self.exchange.upgrade() {
            exchange.set_complete();
        }
    }
}

impl MessageObserver for CleanupObserver {
    fn on_reject(&self) {
        self.complete();
    }

    fn on_timeout(&self) {
        self.complete();
    }

    fn on_cancel(&self) {
        self.complete();
    }

    fn on_send_error(&self, _error: &SendError) {
        self.complete();
    }

    fn on_context_established(&self, context: &EndpointContext) {
        if let Some(exchange) = self.exchange.upgrade() {
            exchange.set_endpoint_context(context.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingObserver {
        completions: AtomicUsize,
    }

    impl ExchangeObserver for CountingObserver {
        fn completed(&self, _exchange: &Exchange) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn completes_exactly_once() {
        let exchange = Exchange::new_local(Request::get());
        let observer = Arc::new(CountingObserver::default());
        exchange.add_observer(observer.clone());

        assert!(exchange.set_complete());
        assert!(!exchange.set_complete());

        assert!(exchange.is_complete());
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_added_after_completion_runs_immediately() {
        let exchange = Exchange::new_local(Request::get());
        exchange.set_complete();

        let observer = Arc::new(CountingObserver::default());
        exchange.add_observer(observer.clone());

        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_cancels_retransmission_timer() {
        let exchange = Exchange::new_local(Request::get());
        let timer = ScheduledTask::new();
        exchange.with_retransmission(|state| state.timer = Some(timer.clone()));

        exchange.set_complete();

        assert!(timer.is_canceled());
    }

    #[test]
    fn cleanup_observer_completes_on_cancel() {
        let request = Request::get();
        let exchange = Exchange::new_local(request.clone());
        CleanupObserver::attach(&exchange, &request);

        request.cancel();

        assert!(exchange.is_complete());
    }

    #[test]
    fn cleanup_observer_completes_on_send_error() {
        let request = Request::get();
        let exchange = Exchange::new_local(request.clone());
        CleanupObserver::attach(&exchange, &request);

        request.set_send_error(SendError::Transport("unreachable".to_string()));

        assert!(exchange.is_complete());
    }

    #[test]
    fn send_response_without_endpoint_reports_destroyed() {
        let exchange = Exchange::new_remote(Request::get());
        let result = exchange.send_response(Response::new(crate::message::Code::CONTENT));
        assert!(matches!(result, Err(EndpointError::Destroyed)));
    }

    #[test]
    fn failed_transmission_count_tracks_retries() {
        let exchange = Exchange::new_local(Request::get());
        assert_eq!(exchange.increment_failed_transmission_count(), 1);
        assert_eq!(exchange.increment_failed_transmission_count(), 2);
        exchange.reset_failed_transmission_count();
        assert_eq!(exchange.failed_transmission_count(), 0);
    }
}
