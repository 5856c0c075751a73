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

use crate::message::{EmptyMessage, Request, Response};

/// Sees every message crossing the endpoint boundary.
///
/// Outbound hooks run after the matcher assigned identifiers and before the
/// message is frozen; inbound hooks run right after parsing. Any hook may
/// cancel the message, which stops it at the next pipeline step.
pub trait MessageInterceptor: Send + Sync {
    fn send_request(&self, _request: &Request) {}

    fn send_response(&self, _response: &Response) {}

    fn send_empty_message(&self, _message: &EmptyMessage) {}

    fn receive_request(&self, _request: &Request) {}

    fn receive_response(&self, _response: &Response) {}

    fn receive_empty_message(&self, _message: &EmptyMessage) {}
}
