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

use crate::exchange::Exchange;
use crate::message::Response;
use crate::observability::{events, fields};
use tracing::{debug, warn};

const COMPONENT: &str = "client_deliverer";

/// Receives fully matched inbound messages at the top of the stack.
///
/// Called on the protocol stage; implementations that do real work should hand
/// it to their own executor and answer through [`Exchange::send_response`].
pub trait MessageDeliverer: Send + Sync {
    fn deliver_request(&self, exchange: &Exchange);

    fn deliver_response(&self, exchange: &Exchange, response: &Response);
}

/// Deliverer installed when the application sets none.
///
/// Attaches responses to their requests so waiting clients see them and rejects
/// every inbound request with a reset.
#[derive(Debug, Default)]
pub struct ClientMessageDeliverer;

impl MessageDeliverer for ClientMessageDeliverer {
    fn deliver_request(&self, exchange: &Exchange) {
        let request = exchange.request();
        warn!(
            event = events::DELIVERER_REQUEST_REJECTED,
            component = COMPONENT,
            exchange_id = exchange.id(),
            code = %request.code(),
            peer = fields::format_peer(request.source().as_ref()).as_str(),
            "no server deliverer installed; rejecting request"
        );
        if let Err(err) = exchange.send_reject() {
            debug!(
                event = events::DELIVERER_REQUEST_REJECTED,
                component = COMPONENT,
                exchange_id = exchange.id(),
                err = %err,
                "reset could not be sent"
            );
        }
    }

    fn deliver_response(&self, exchange: &Exchange, response: &Response) {
        exchange.request().set_response(response.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Code, Request};

    #[test]
    fn response_is_attached_to_request() {
        let request = Request::get();
        let exchange = Exchange::new_local(request.clone());
        let response = Response::new(Code::CONTENT);

        ClientMessageDeliverer.deliver_response(&exchange, &response);

        assert!(request
            .response()
            .is_some_and(|attached| attached.ptr_eq(&response)));
    }

    #[test]
    fn request_is_marked_rejected_without_endpoint() {
        let request = Request::get();
        let exchange = Exchange::new_remote(request.clone());

        ClientMessageDeliverer.deliver_request(&exchange);

        assert!(request.is_rejected());
    }
}
