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

use crate::config::ResourceConfig;
use coap_endpoint::exchange::Exchange;
use coap_endpoint::message::{Code, Response};
use coap_endpoint::MessageDeliverer;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

struct Resource {
    content: Vec<u8>,
    writable: bool,
}

/// Serves the resources listed in the configuration file.
///
/// `GET` returns the content, `PUT` replaces it on writable resources.
pub struct StaticResources {
    resources: Mutex<HashMap<String, Resource>>,
}

impl StaticResources {
    pub fn new(configs: &[ResourceConfig]) -> Self {
        let resources = configs
            .iter()
            .map(|config| {
                (
                    config.path.trim_matches('/').to_string(),
                    Resource {
                        content: config.content.clone().into_bytes(),
                        writable: config.writable,
                    },
                )
            })
            .collect();
        Self {
            resources: Mutex::new(resources),
        }
    }

    fn handle(&self, code: Code, path: &str, payload: Vec<u8>) -> (Code, Vec<u8>) {
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(resource) = resources.get_mut(path) else {
            return (Code::NOT_FOUND, Vec::new());
        };
        match code {
            Code::GET => (Code::CONTENT, resource.content.clone()),
            Code::PUT if resource.writable => {
                resource.content = payload;
                (Code::CHANGED, Vec::new())
            }
            _ => (Code::METHOD_NOT_ALLOWED, Vec::new()),
        }
    }
}

impl MessageDeliverer for StaticResources {
    fn deliver_request(&self, exchange: &Exchange) {
        let request = exchange.request();
        let path = request.options().uri_path_string();
        let (code, payload) = self.handle(request.code(), path.trim_matches('/'), request.payload());
        debug!(
            method = %request.code(),
            path = path.as_str(),
            response = %code,
            "serving resource"
        );

        let response = Response::for_request(&request, code).with_payload(payload);
        if let Err(err) = exchange.send_response(response) {
            warn!(path = path.as_str(), err = %err, "unable to send response");
        }
    }

    fn deliver_response(&self, exchange: &Exchange, response: &Response) {
        exchange.request().set_response(response.clone());
    }
}
