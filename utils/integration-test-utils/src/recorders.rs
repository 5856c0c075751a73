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

use crate::lock;
use coap_endpoint::exchange::{Exchange, ExchangeObserver};
use coap_endpoint::message::{
    Code, EmptyMessage, EndpointContext, MessageObserver, Request, Response,
};
use coap_endpoint::{MessageDeliverer, MessageInterceptor, NotificationListener, SendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Deliverer that records everything it is handed.
///
/// Built with [`RecordingDeliverer::responding`] it also answers every request.
#[derive(Default)]
pub struct RecordingDeliverer {
    requests: Mutex<Vec<Exchange>>,
    responses: Mutex<Vec<Response>>,
    reply: Option<(Code, Vec<u8>)>,
}

impl RecordingDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding(code: Code, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            reply: Some((code, payload.into())),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Exchange> {
        lock(&self.requests).clone()
    }

    pub fn responses(&self) -> Vec<Response> {
        lock(&self.responses).clone()
    }
}

impl MessageDeliverer for RecordingDeliverer {
    fn deliver_request(&self, exchange: &Exchange) {
        lock(&self.requests).push(exchange.clone());
        let Some((code, payload)) = &self.reply else {
            return;
        };
        let response = Response::for_request(&exchange.request(), *code).with_payload(payload.clone());
        if let Err(err) = exchange.send_response(response) {
            debug!(err = %err, "recording deliverer failed to respond");
        }
    }

    fn deliver_response(&self, exchange: &Exchange, response: &Response) {
        exchange.request().set_response(response.clone());
        lock(&self.responses).push(response.clone());
    }
}

/// Interceptor counting every message; optionally cancels outbound requests.
#[derive(Default)]
pub struct RecordingInterceptor {
    cancel_requests: AtomicBool,
    sent_requests: AtomicUsize,
    sent_responses: AtomicUsize,
    sent_empty: AtomicUsize,
    received_requests: AtomicUsize,
    received_responses: AtomicUsize,
    received_empty: AtomicUsize,
}

impl RecordingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canceling_requests() -> Self {
        let interceptor = Self::default();
        interceptor.cancel_requests.store(true, Ordering::SeqCst);
        interceptor
    }

    pub fn sent_requests(&self) -> usize {
        self.sent_requests.load(Ordering::SeqCst)
    }

    pub fn sent_responses(&self) -> usize {
        self.sent_responses.load(Ordering::SeqCst)
    }

    pub fn sent_empty(&self) -> usize {
        self.sent_empty.load(Ordering::SeqCst)
    }

    pub fn received_requests(&self) -> usize {
        self.received_requests.load(Ordering::SeqCst)
    }

    pub fn received_responses(&self) -> usize {
        self.received_responses.load(Ordering::SeqCst)
    }

    pub fn received_empty(&self) -> usize {
        self.received_empty.load(Ordering::SeqCst)
    }
}

impl MessageInterceptor for RecordingInterceptor {
    fn send_request(&self, request: &Request) {
        self.sent_requests.fetch_add(1, Ordering::SeqCst);
        if self.cancel_requests.load(Ordering::SeqCst) {
            request.cancel();
        }
    }

    fn send_response(&self, _response: &Response) {
        self.sent_responses.fetch_add(1, Ordering::SeqCst);
    }

    fn send_empty_message(&self, _message: &EmptyMessage) {
        self.sent_empty.fetch_add(1, Ordering::SeqCst);
    }

    fn receive_request(&self, _request: &Request) {
        self.received_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn receive_response(&self, _response: &Response) {
        self.received_responses.fetch_add(1, Ordering::SeqCst);
    }

    fn receive_empty_message(&self, _message: &EmptyMessage) {
        self.received_empty.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingNotificationListener {
    notifications: Mutex<Vec<Response>>,
}

impl RecordingNotificationListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Response> {
        lock(&self.notifications).clone()
    }
}

impl NotificationListener for RecordingNotificationListener {
    fn on_notification(&self, _request: &Request, response: &Response) {
        lock(&self.notifications).push(response.clone());
    }
}

/// Counts the lifecycle callbacks one message receives.
#[derive(Default)]
pub struct RecordingMessageObserver {
    retransmissions: AtomicUsize,
    responses: AtomicUsize,
    acknowledgements: AtomicUsize,
    rejects: AtomicUsize,
    timeouts: AtomicUsize,
    cancels: AtomicUsize,
    sent: AtomicUsize,
    send_errors: Mutex<Vec<SendError>>,
    contexts: AtomicUsize,
}

impl RecordingMessageObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retransmissions(&self) -> usize {
        self.retransmissions.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub fn acknowledgements(&self) -> usize {
        self.acknowledgements.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> usize {
        self.rejects.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn send_errors(&self) -> Vec<SendError> {
        lock(&self.send_errors).clone()
    }

    pub fn contexts_established(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }
}

impl MessageObserver for RecordingMessageObserver {
    fn on_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response(&self, _response: &Response) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_acknowledgement(&self) {
        self.acknowledgements.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reject(&self) {
        self.rejects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn on_send_error(&self, error: &SendError) {
        lock(&self.send_errors).push(error.clone());
    }

    fn on_context_established(&self, _context: &EndpointContext) {
        self.contexts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingExchangeObserver {
    completions: AtomicUsize,
}

impl RecordingExchangeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl ExchangeObserver for RecordingExchangeObserver {
    fn completed(&self, _exchange: &Exchange) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}
