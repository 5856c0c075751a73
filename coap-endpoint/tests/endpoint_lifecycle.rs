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

mod support;

use coap_endpoint::message::{Code, Request};
use coap_endpoint::{Endpoint, EndpointError, EndpointObserver};
use integration_test_utils::{ManualExecutor, Network, RecordingDeliverer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::Testbed;

#[derive(Default)]
struct TransitionCounter {
    started: AtomicUsize,
    stopped: AtomicUsize,
    destroyed: AtomicUsize,
}

impl EndpointObserver for TransitionCounter {
    fn started(&self, _endpoint: &Endpoint) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn stopped(&self, _endpoint: &Endpoint) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn destroyed(&self, _endpoint: &Endpoint) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn stopped_server_ignores_traffic_until_restarted() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "up"),
    )
    .await;

    bed.server.endpoint.stop().await;
    assert!(!bed.server.endpoint.is_started());

    let request = Request::get()
        .with_destination(bed.server_context())
        .with_uri_path("health");
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();
    assert!(bed.server.deliverer.requests().is_empty());
    assert!(!exchange.is_complete());

    bed.server
        .endpoint
        .start()
        .await
        .expect("server should restart");
    bed.client.executor.advance(Duration::from_millis(100));
    bed.settle();

    assert_eq!(bed.server.deliverer.requests().len(), 1);
    assert!(exchange.is_complete());
    assert_eq!(bed.client.deliverer.responses().len(), 1);

    bed.destroy().await;
}

#[tokio::test]
async fn observers_follow_every_transition() {
    integration_test_utils::init_logging();
    let network = Network::new();
    let executor = ManualExecutor::new();
    let endpoint = Endpoint::builder(network.connector(support::server_address()))
        .config(support::config())
        .executor(executor.clone())
        .build()
        .expect("test config should be valid");
    let counter = Arc::new(TransitionCounter::default());
    endpoint.add_observer(counter.clone());

    endpoint.start().await.expect("endpoint should start");
    endpoint.start().await.expect("second start is a no-op");
    endpoint.stop().await;
    endpoint.destroy().await;

    assert_eq!(counter.started.load(Ordering::SeqCst), 1);
    assert_eq!(counter.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(counter.destroyed.load(Ordering::SeqCst), 1);
    // The executor was supplied by the caller; the endpoint leaves it running.
    assert!(!executor.is_shut_down());

    assert!(matches!(endpoint.start().await, Err(EndpointError::Destroyed)));
    let request = Request::get().with_destination(support::client_context());
    assert!(matches!(
        endpoint.send_request(request),
        Err(EndpointError::Destroyed)
    ));
}
