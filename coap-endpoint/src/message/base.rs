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

//! Shared message state: protocol fields, lifecycle flags and observers.

use super::{Code, EndpointContext, MessageError, MessageType, OptionSet, Response, Token};
use crate::error::SendError;
use crate::runtime::listener_list::ListenerList;
use crate::runtime::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Callbacks describing the life of one outgoing message.
///
/// All methods default to no-ops. Observers run on whichever thread drives the
/// transition (protocol stage or connector) and must not block.
pub trait MessageObserver: Send + Sync {
    fn on_retransmission(&self) {}
    fn on_response(&self, _response: &Response) {}
    fn on_acknowledgement(&self) {}
    fn on_reject(&self) {}
    fn on_timeout(&self) {}
    fn on_cancel(&self) {}
    fn on_ready_to_send(&self) {}
    fn on_sent(&self) {}
    fn on_send_error(&self, _error: &SendError) {}
    fn on_context_established(&self, _context: &EndpointContext) {}
}

#[derive(Clone, Debug, Default)]
struct MessageFields {
    message_type: Option<MessageType>,
    code: Code,
    mid: Option<u16>,
    token: Option<Token>,
    options: OptionSet,
    payload: Vec<u8>,
    destination: Option<EndpointContext>,
    source: Option<EndpointContext>,
}

/// State common to requests, responses and empty messages.
///
/// Content is frozen once the message is ready to send; setters then return
/// [`MessageError::ReadyToSend`]. Status flags stay writable for the whole life
/// of the message.
pub struct MessageCore {
    fields: Mutex<MessageFields>,
    ready_to_send: AtomicBool,
    canceled: AtomicBool,
    sent: AtomicBool,
    acknowledged: AtomicBool,
    rejected: AtomicBool,
    timed_out: AtomicBool,
    duplicate: AtomicBool,
    send_error: Mutex<Option<SendError>>,
    rtt: Mutex<Option<Duration>>,
    observers: ListenerList<dyn MessageObserver>,
}

impl MessageCore {
    pub(crate) fn new(message_type: Option<MessageType>, code: Code) -> Self {
        Self {
            fields: Mutex::new(MessageFields {
                message_type,
                code,
                ..MessageFields::default()
            }),
            ready_to_send: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            sent: AtomicBool::new(false),
            acknowledged: AtomicBool::new(false),
            rejected: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            duplicate: AtomicBool::new(false),
            send_error: Mutex::new(None),
            rtt: Mutex::new(None),
            observers: ListenerList::new(),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        lock(&self.fields).message_type
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type() == Some(MessageType::Confirmable)
    }

    pub fn code(&self) -> Code {
        lock(&self.fields).code
    }

    pub fn mid(&self) -> Option<u16> {
        lock(&self.fields).mid
    }

    pub fn has_mid(&self) -> bool {
        self.mid().is_some()
    }

    pub fn token(&self) -> Option<Token> {
        lock(&self.fields).token.clone()
    }

    pub fn options(&self) -> OptionSet {
        lock(&self.fields).options.clone()
    }

    /// Reads options without cloning the whole set.
    pub fn with_options_ref<R>(&self, read: impl FnOnce(&OptionSet) -> R) -> R {
        read(&lock(&self.fields).options)
    }

    pub fn payload(&self) -> Vec<u8> {
        lock(&self.fields).payload.clone()
    }

    pub fn payload_len(&self) -> usize {
        lock(&self.fields).payload.len()
    }

    pub fn destination(&self) -> Option<EndpointContext> {
        lock(&self.fields).destination.clone()
    }

    pub fn source(&self) -> Option<EndpointContext> {
        lock(&self.fields).source.clone()
    }

    pub fn set_type(&self, message_type: MessageType) -> Result<(), MessageError> {
        self.update(|fields| fields.message_type = Some(message_type))
    }

    pub fn set_code(&self, code: Code) -> Result<(), MessageError> {
        self.update(|fields| fields.code = code)
    }

    pub fn set_mid(&self, mid: u16) -> Result<(), MessageError> {
        self.update(|fields| fields.mid = Some(mid))
    }

    pub fn set_token(&self, token: Token) -> Result<(), MessageError> {
        self.update(|fields| fields.token = Some(token))
    }

    pub fn set_options(&self, options: OptionSet) -> Result<(), MessageError> {
        self.update(|fields| fields.options = options)
    }

    pub fn update_options(&self, edit: impl FnOnce(&mut OptionSet)) -> Result<(), MessageError> {
        self.update(|fields| edit(&mut fields.options))
    }

    pub fn set_payload(&self, payload: impl Into<Vec<u8>>) -> Result<(), MessageError> {
        let payload = payload.into();
        self.update(|fields| fields.payload = payload)
    }

    pub fn set_destination(&self, destination: EndpointContext) -> Result<(), MessageError> {
        self.update(|fields| fields.destination = Some(destination))
    }

    pub fn set_source(&self, source: EndpointContext) -> Result<(), MessageError> {
        self.update(|fields| fields.source = Some(source))
    }

    fn update(&self, edit: impl FnOnce(&mut MessageFields)) -> Result<(), MessageError> {
        let mut fields = lock(&self.fields);
        // Checked under the fields lock so a concurrent freeze cannot interleave.
        if self.is_ready_to_send() {
            return Err(MessageError::ReadyToSend);
        }
        edit(&mut fields);
        Ok(())
    }

    pub fn add_message_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.add(observer);
    }

    pub fn remove_message_observer(&self, observer: &Arc<dyn MessageObserver>) -> bool {
        self.observers.remove(observer)
    }

    pub(crate) fn message_observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&self, event: impl Fn(&dyn MessageObserver)) {
        for observer in self.observers.snapshot().iter() {
            event(observer.as_ref());
        }
    }

    /// Cancels the message. Observers hear about it once.
    pub fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            self.notify(|observer| observer.on_cancel());
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn set_ready_to_send(&self) {
        let already_ready = {
            let _fields = lock(&self.fields);
            self.ready_to_send.swap(true, Ordering::SeqCst)
        };
        if !already_ready {
            self.notify(|observer| observer.on_ready_to_send());
        }
    }

    pub fn is_ready_to_send(&self) -> bool {
        self.ready_to_send.load(Ordering::SeqCst)
    }

    pub fn set_sent(&self) {
        self.sent.store(true, Ordering::SeqCst);
        self.notify(|observer| observer.on_sent());
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn set_send_error(&self, error: SendError) {
        *lock(&self.send_error) = Some(error.clone());
        self.notify(|observer| observer.on_send_error(&error));
    }

    pub fn send_error(&self) -> Option<SendError> {
        lock(&self.send_error).clone()
    }

    pub fn set_acknowledged(&self) {
        if !self.acknowledged.swap(true, Ordering::SeqCst) {
            self.notify(|observer| observer.on_acknowledgement());
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn set_rejected(&self) {
        if !self.rejected.swap(true, Ordering::SeqCst) {
            self.notify(|observer| observer.on_reject());
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Marks retransmission as exhausted and reports [`SendError::Timeout`].
    pub fn set_timed_out(&self) {
        if self.timed_out.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify(|observer| observer.on_timeout());
        self.set_send_error(SendError::Timeout);
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn set_duplicate(&self, duplicate: bool) {
        self.duplicate.store(duplicate, Ordering::SeqCst);
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate.load(Ordering::SeqCst)
    }

    pub(crate) fn notify_retransmission(&self) {
        self.notify(|observer| observer.on_retransmission());
    }

    pub(crate) fn notify_context_established(&self, context: &EndpointContext) {
        self.notify(|observer| observer.on_context_established(context));
    }

    pub(crate) fn notify_response(&self, response: &Response) {
        self.notify(|observer| observer.on_response(response));
    }

    pub fn set_rtt(&self, rtt: Duration) {
        *lock(&self.rtt) = Some(rtt);
    }

    pub fn rtt(&self) -> Option<Duration> {
        *lock(&self.rtt)
    }
}

impl std::fmt::Debug for MessageCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = lock(&self.fields);
        f.debug_struct("Message")
            .field("type", &fields.message_type)
            .field("code", &fields.code)
            .field("mid", &fields.mid)
            .field("token", &fields.token)
            .field("payload_len", &fields.payload.len())
            .finish_non_exhaustive()
    }
}
