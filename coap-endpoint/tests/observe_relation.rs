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

use coap_endpoint::exchange::Exchange;
use coap_endpoint::message::{Code, Message, MessageType, Request, Response};
use coap_endpoint::NotificationListener;
use integration_test_utils::{RecordingDeliverer, RecordingNotificationListener};
use std::sync::Arc;
use support::Testbed;

fn notify(exchange: &Exchange, payload: &str) {
    let response = Response::for_request(&exchange.request(), Code::CONTENT).with_payload(payload);
    exchange
        .send_response(response)
        .expect("server endpoint is running");
}

#[tokio::test]
async fn notifications_flow_until_client_cancels() {
    let bed = Testbed::start(support::config(), RecordingDeliverer::new()).await;
    let listener = Arc::new(RecordingNotificationListener::new());
    let as_trait: Arc<dyn NotificationListener> = listener.clone();
    bed.client.endpoint.add_notification_listener(as_trait.clone());

    let request = Request::get()
        .with_destination(bed.server_context())
        .with_uri_path("sensors/temp")
        .with_observe();
    let client_exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    bed.settle();

    let registrations = bed.server.deliverer.requests();
    assert_eq!(registrations.len(), 1);
    let server_exchange = registrations[0].clone();

    notify(&server_exchange, "21.0");
    bed.settle();
    assert!(server_exchange.has_active_relation());
    assert!(!client_exchange.is_complete());

    notify(&server_exchange, "21.5");
    bed.settle();

    let notifications = listener.notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].message_type(), Some(MessageType::Acknowledgement));
    assert_eq!(notifications[1].message_type(), Some(MessageType::NonConfirmable));
    assert_eq!(notifications[1].payload(), b"21.5".to_vec());
    let sequences: Vec<Option<u32>> = notifications
        .iter()
        .map(|notification| notification.options().observe)
        .collect();
    assert_eq!(sequences, vec![Some(0), Some(1)]);
    assert_eq!(bed.client.deliverer.responses().len(), 2);
    assert_eq!(
        request.response().map(|response| response.payload()),
        Some(b"21.5".to_vec())
    );

    let token = request.token().expect("token assigned on send");
    bed.client.endpoint.cancel_observation(&token);
    assert!(client_exchange.is_complete());

    // The next notification finds no exchange and is reset.
    notify(&server_exchange, "22.0");
    bed.settle();

    assert_eq!(listener.notifications().len(), 2);
    let Some(Message::Empty(reset)) = bed.client.connector.sent_messages().pop() else {
        panic!("client should have reset the stale notification");
    };
    assert_eq!(reset.message_type(), Some(MessageType::Reset));
    assert!(!server_exchange.has_active_relation());
    assert!(server_exchange.is_complete());

    assert!(bed.client.endpoint.remove_notification_listener(&as_trait));
    bed.destroy().await;
}

#[tokio::test]
async fn error_response_ends_relation() {
    let bed = Testbed::start(support::config(), RecordingDeliverer::new()).await;
    let request = Request::get()
        .with_destination(bed.server_context())
        .with_uri_path("sensors/temp")
        .with_observe();
    let client_exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();

    let server_exchange = bed.server.deliverer.requests()[0].clone();
    notify(&server_exchange, "21.0");
    bed.settle();
    assert!(server_exchange.has_active_relation());

    let gone = Response::for_request(&server_exchange.request(), Code::NOT_FOUND);
    server_exchange
        .send_response(gone)
        .expect("server endpoint is running");
    bed.settle();

    assert!(!server_exchange.has_active_relation());
    assert!(client_exchange.is_complete());
    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.last().map(|response| response.code()), Some(Code::NOT_FOUND));

    bed.destroy().await;
}
