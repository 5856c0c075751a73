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

//! Data-plane layer.
//!
//! Owns the two pipeline ends of an endpoint. The inbox validates bytes from
//! the connector, parses them and walks each message through interceptors,
//! matcher and stack. The outbox registers outbound messages with the matcher,
//! fans them out to interceptors, serializes them and hands the bytes to the
//! connector together with a send-outcome callback.
//!
//! ```
//! use coap_endpoint::message::{Code, Request};
//! use coap_endpoint::transport::codec::{MessageCodec, UdpCodec};
//!
//! // The codec the UDP pipelines use on both ends.
//! let codec = UdpCodec;
//! let request = Request::get().with_mid(7).with_uri_path("sensors/temp");
//!
//! let bytes = codec.serialize(&request.into()).unwrap();
//! let parsed = codec.parse(&bytes).unwrap();
//! assert_eq!(parsed.core().mid(), Some(7));
//! assert_eq!(parsed.core().code(), Code::GET);
//! ```

pub(crate) mod inbox;
pub(crate) mod outbox;

use crate::observability::events;
use crate::stack::StackError;
use tracing::warn;

/// Logs a stack failure. The failure aborts the one message only.
pub(crate) fn log_stack_error(component: &'static str, exchange_id: u64, err: &StackError) {
    warn!(
        event = events::STACK_TASK_FAILED,
        component,
        exchange_id,
        err = %err,
        "stack processing failed"
    );
}
