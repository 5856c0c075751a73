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

//! Canonical structured field keys and value-format helpers.

use crate::message::{EndpointContext, MessageCore, MessageType, Token};

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const ENDPOINT_ID: &str = "endpoint_id";
pub const WORKER_THREAD: &str = "worker_thread";

pub const MID: &str = "mid";
pub const TOKEN: &str = "token";
pub const MSG_TYPE: &str = "msg_type";
pub const CODE: &str = "code";
pub const PEER: &str = "peer";

pub const ATTEMPT: &str = "attempt";
pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";
pub const REASON_INTERCEPTOR_CANCELED: &str = "interceptor_canceled";
pub const REASON_MISSING_CONTEXT: &str = "missing_context";
pub const REASON_MISSING_SOURCE_PORT: &str = "missing_source_port";
pub const REASON_NOT_STARTED: &str = "not_started";
pub const DEFAULT_WORKER_THREAD: &str = "unknown-thread";

pub fn thread_name_or_default(thread_name: Option<&str>) -> String {
    thread_name.unwrap_or(DEFAULT_WORKER_THREAD).to_string()
}

pub fn current_thread_name_or_default() -> String {
    thread_name_or_default(std::thread::current().name())
}

pub fn format_mid(mid: Option<u16>) -> String {
    mid.map(|mid| mid.to_string())
        .unwrap_or_else(|| NONE.to_string())
}

pub fn format_token(token: Option<&Token>) -> String {
    token
        .map(|token| token.to_string())
        .unwrap_or_else(|| NONE.to_string())
}

pub fn format_message_type(message_type: Option<MessageType>) -> String {
    message_type
        .map(|message_type| message_type.to_string())
        .unwrap_or_else(|| NONE.to_string())
}

pub fn format_peer(context: Option<&EndpointContext>) -> String {
    context
        .map(|context| context.peer().to_string())
        .unwrap_or_else(|| NONE.to_string())
}

/// Pre-rendered message identity used by pipeline log events.
pub(crate) struct MessageLogFields {
    pub(crate) mid: String,
    pub(crate) token: String,
    pub(crate) msg_type: String,
    pub(crate) code: String,
    pub(crate) peer: String,
}

impl MessageLogFields {
    /// Renders identity fields. `peer` prefers the destination and falls back to the source.
    pub(crate) fn from_message(message: &MessageCore) -> Self {
        let peer = message.destination().or_else(|| message.source());
        Self {
            mid: format_mid(message.mid()),
            token: format_token(message.token().as_ref()),
            msg_type: format_message_type(message.message_type()),
            code: message.code().to_string(),
            peer: format_peer(peer.as_ref()),
        }
    }
}
