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

//! Interceptor that logs every message crossing the endpoint boundary.

use super::events;
use super::fields::MessageLogFields;
use crate::control_plane::MessageInterceptor;
use crate::message::{EmptyMessage, MessageCore, Request, Response};
use tracing::{debug, Level};

const COMPONENT: &str = "message_tracer";

#[derive(Clone, Copy, Debug, Default)]
pub struct MessageTracer;

impl MessageTracer {
    pub fn new() -> Self {
        Self
    }

    fn trace(direction: &'static str, kind: &'static str, message: &MessageCore) {
        if !tracing::enabled!(Level::DEBUG) {
            return;
        }
        let fields = MessageLogFields::from_message(message);
        debug!(
            event = events::MESSAGE_TRACE,
            component = COMPONENT,
            direction,
            kind,
            mid = fields.mid.as_str(),
            token = fields.token.as_str(),
            msg_type = fields.msg_type.as_str(),
            code = fields.code.as_str(),
            peer = fields.peer.as_str(),
            payload_len = message.payload_len(),
            "message"
        );
    }
}

impl MessageInterceptor for MessageTracer {
    fn send_request(&self, request: &Request) {
        Self::trace("out", "request", request);
    }

    fn send_response(&self, response: &Response) {
        Self::trace("out", "response", response);
    }

    fn send_empty_message(&self, message: &EmptyMessage) {
        Self::trace("out", "empty", message);
    }

    fn receive_request(&self, request: &Request) {
        Self::trace("in", "request", request);
    }

    fn receive_response(&self, response: &Response) {
        Self::trace("in", "response", response);
    }

    fn receive_empty_message(&self, message: &EmptyMessage) {
        Self::trace("in", "empty", message);
    }
}
