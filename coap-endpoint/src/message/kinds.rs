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

//! Request, response and empty message handles.
//!
//! Each handle is a cheap clone of a shared [`MessageCore`]; clones observe the
//! same fields and flags. The `with_*` builders are meant for construction and
//! leave a message that is already ready to send unchanged.

use super::{Code, EndpointContext, MessageCore, MessageType, OptionSet, Token};
use crate::runtime::lock;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

struct RequestInner {
    core: MessageCore,
    response: Mutex<Option<Response>>,
}

#[derive(Clone)]
pub struct Request(Arc<RequestInner>);

impl Request {
    /// Confirmable request with `code`.
    pub fn new(code: Code) -> Self {
        Request(Arc::new(RequestInner {
            core: MessageCore::new(Some(MessageType::Confirmable), code),
            response: Mutex::new(None),
        }))
    }

    /// Request as read from the wire; the type is whatever the transport framed.
    pub(crate) fn inbound(message_type: Option<MessageType>, code: Code) -> Self {
        Request(Arc::new(RequestInner {
            core: MessageCore::new(message_type, code),
            response: Mutex::new(None),
        }))
    }

    pub fn get() -> Self {
        Self::new(Code::GET)
    }

    pub fn post() -> Self {
        Self::new(Code::POST)
    }

    pub fn put() -> Self {
        Self::new(Code::PUT)
    }

    pub fn delete() -> Self {
        Self::new(Code::DELETE)
    }

    pub fn with_type(self, message_type: MessageType) -> Self {
        let _ = self.set_type(message_type);
        self
    }

    pub fn with_destination(self, destination: EndpointContext) -> Self {
        let _ = self.set_destination(destination);
        self
    }

    pub fn with_token(self, token: Token) -> Self {
        let _ = self.set_token(token);
        self
    }

    pub fn with_mid(self, mid: u16) -> Self {
        let _ = self.set_mid(mid);
        self
    }

    pub fn with_uri_path(self, path: &str) -> Self {
        let _ = self.update_options(|options| options.set_uri_path(path));
        self
    }

    pub fn with_options(self, edit: impl FnOnce(&mut OptionSet)) -> Self {
        let _ = self.update_options(edit);
        self
    }

    pub fn with_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        let _ = self.set_payload(payload);
        self
    }

    /// Registers interest in notifications (Observe = 0).
    pub fn with_observe(self) -> Self {
        self.with_options(|options| options.observe = Some(0))
    }

    pub fn is_observe(&self) -> bool {
        self.with_options_ref(|options| options.observe == Some(0))
    }

    pub fn is_observe_cancel(&self) -> bool {
        self.with_options_ref(|options| options.observe == Some(1))
    }

    /// Latest response attached by the deliverer.
    pub fn response(&self) -> Option<Response> {
        lock(&self.0.response).clone()
    }

    /// Attaches `response` and notifies observers.
    pub fn set_response(&self, response: Response) {
        *lock(&self.0.response) = Some(response.clone());
        self.notify_response(&response);
    }

    pub fn ptr_eq(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Request {
    type Target = MessageCore;

    fn deref(&self) -> &MessageCore {
        &self.0.core
    }
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request({:?})", self.0.core)
    }
}

#[derive(Clone)]
pub struct Response(Arc<MessageCore>);

impl Response {
    /// The type is left open; the reliability stage decides it on send.
    pub fn new(code: Code) -> Self {
        Response(Arc::new(MessageCore::new(None, code)))
    }

    pub(crate) fn inbound(message_type: Option<MessageType>, code: Code) -> Self {
        Response(Arc::new(MessageCore::new(message_type, code)))
    }

    /// Response addressed to the source of `request`.
    pub fn for_request(request: &Request, code: Code) -> Self {
        let response = Self::new(code);
        if let Some(source) = request.source() {
            let _ = response.set_destination(source);
        }
        response
    }

    pub fn with_type(self, message_type: MessageType) -> Self {
        let _ = self.set_type(message_type);
        self
    }

    pub fn with_destination(self, destination: EndpointContext) -> Self {
        let _ = self.set_destination(destination);
        self
    }

    pub fn with_options(self, edit: impl FnOnce(&mut OptionSet)) -> Self {
        let _ = self.update_options(edit);
        self
    }

    pub fn with_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        let _ = self.set_payload(payload);
        self
    }

    /// Whether this response carries an Observe option.
    pub fn is_notification(&self) -> bool {
        self.with_options_ref(OptionSet::has_observe)
    }

    pub fn ptr_eq(&self, other: &Response) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Response {
    type Target = MessageCore;

    fn deref(&self) -> &MessageCore {
        &self.0
    }
}

impl Debug for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Response({:?})", self.0)
    }
}

#[derive(Clone)]
pub struct EmptyMessage(Arc<MessageCore>);

impl EmptyMessage {
    pub fn new(message_type: MessageType) -> Self {
        let core = MessageCore::new(Some(message_type), Code::EMPTY);
        let _ = core.set_token(Token::empty());
        EmptyMessage(Arc::new(core))
    }

    pub(crate) fn inbound(message_type: Option<MessageType>) -> Self {
        EmptyMessage(Arc::new(MessageCore::new(message_type, Code::EMPTY)))
    }

    /// Acknowledgement for a received confirmable message.
    pub fn ack_for(message: &MessageCore) -> Self {
        Self::reply_to(message, MessageType::Acknowledgement)
    }

    /// Reset for a received message.
    pub fn rst_for(message: &MessageCore) -> Self {
        Self::reply_to(message, MessageType::Reset)
    }

    fn reply_to(message: &MessageCore, message_type: MessageType) -> Self {
        let reply = Self::new(message_type);
        if let Some(mid) = message.mid() {
            let _ = reply.set_mid(mid);
        }
        if let Some(source) = message.source() {
            let _ = reply.set_destination(source);
        }
        reply
    }

    pub fn with_mid(self, mid: u16) -> Self {
        let _ = self.set_mid(mid);
        self
    }

    pub fn with_destination(self, destination: EndpointContext) -> Self {
        let _ = self.set_destination(destination);
        self
    }

    pub fn ptr_eq(&self, other: &EmptyMessage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for EmptyMessage {
    type Target = MessageCore;

    fn deref(&self) -> &MessageCore {
        &self.0
    }
}

impl Debug for EmptyMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmptyMessage({:?})", self.0)
    }
}

/// Any message the endpoint can parse or serialize.
#[derive(Clone, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    Empty(EmptyMessage),
}

impl Message {
    pub fn core(&self) -> &MessageCore {
        match self {
            Message::Request(request) => &**request,
            Message::Response(response) => &**response,
            Message::Empty(empty) => &**empty,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Empty(_) => "empty",
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<EmptyMessage> for Message {
    fn from(empty: EmptyMessage) -> Self {
        Message::Empty(empty)
    }
}
