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

//! Send-outcome callback handed to connectors with every outbound message.

use crate::error::SendError;
use crate::exchange::Exchange;
use crate::message::{EndpointContext, Message, Request};

#[derive(Clone, Debug)]
enum CallbackTarget {
    /// Forward outcome flags to the message; a failure also completes the exchange.
    Forward {
        message: Message,
        exchange: Option<Exchange>,
    },
    /// Requests additionally record the endpoint context the connector established.
    Request { request: Request, exchange: Exchange },
}

/// Reports connector outcomes back onto the message and its exchange.
#[derive(Clone, Debug)]
pub struct MessageCallback {
    target: CallbackTarget,
}

impl MessageCallback {
    pub(crate) fn forward(message: Message, exchange: Option<Exchange>) -> Self {
        Self {
            target: CallbackTarget::Forward { message, exchange },
        }
    }

    pub(crate) fn request(request: Request, exchange: Exchange) -> Self {
        Self {
            target: CallbackTarget::Request { request, exchange },
        }
    }

    pub fn on_context_established(&self, context: &EndpointContext) {
        match &self.target {
            CallbackTarget::Request { request, exchange } => {
                exchange.set_endpoint_context(context.clone());
                request.notify_context_established(context);
            }
            CallbackTarget::Forward { message, .. } => {
                message.core().notify_context_established(context);
            }
        }
    }

    pub fn on_sent(&self) {
        match &self.target {
            CallbackTarget::Request { request, .. } => request.set_sent(),
            CallbackTarget::Forward { message, .. } => message.core().set_sent(),
        }
    }

    pub fn on_error(&self, error: SendError) {
        match &self.target {
            CallbackTarget::Request { request, exchange } => {
                request.set_send_error(error);
                exchange.set_complete();
            }
            CallbackTarget::Forward { message, exchange } => {
                message.core().set_send_error(error);
                if let Some(exchange) = exchange {
                    exchange.set_complete();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Code, Response};
    use std::net::SocketAddr;

    #[test]
    fn request_callback_records_context_and_sent() {
        let request = Request::get();
        let exchange = Exchange::new_local(request.clone());
        let callback = MessageCallback::request(request.clone(), exchange.clone());
        let context = EndpointContext::new(SocketAddr::from(([127, 0, 0, 1], 5684)));

        callback.on_context_established(&context);
        callback.on_sent();

        assert_eq!(exchange.endpoint_context(), Some(context));
        assert!(request.is_sent());
        assert!(!exchange.is_complete());
    }

    #[test]
    fn forward_error_completes_exchange() {
        let exchange = Exchange::new_remote(Request::get());
        let response = Response::new(Code::CONTENT);
        let callback = MessageCallback::forward(response.clone().into(), Some(exchange.clone()));

        callback.on_error(SendError::ConnectorStopped);

        assert_eq!(response.send_error(), Some(SendError::ConnectorStopped));
        assert!(exchange.is_complete());
    }
}
