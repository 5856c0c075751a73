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

use coap_endpoint::message::{Code, Message, MessageType, Request};
use coap_endpoint::{MessageInterceptor, SendError};
use integration_test_utils::{
    RecordingDeliverer, RecordingExchangeObserver, RecordingInterceptor, RecordingMessageObserver,
};
use std::sync::Arc;
use std::time::Duration;
use support::Testbed;

fn temperature_request(bed: &Testbed) -> Request {
    Request::get()
        .with_destination(bed.server_context())
        .with_uri_path("sensors/temp")
}

#[tokio::test]
async fn piggybacked_response_completes_client_exchange() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "22.5"),
    )
    .await;
    let observer = Arc::new(RecordingMessageObserver::new());
    let completions = Arc::new(RecordingExchangeObserver::new());

    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());
    let exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    exchange.add_observer(completions.clone());
    bed.settle();

    assert!(exchange.is_complete());
    assert_eq!(completions.completions(), 1);
    assert!(request.is_acknowledged());
    assert_eq!(observer.sent(), 1);
    assert_eq!(observer.responses(), 1);

    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), Code::CONTENT);
    assert_eq!(responses[0].message_type(), Some(MessageType::Acknowledgement));
    assert_eq!(responses[0].mid(), request.mid());
    assert_eq!(responses[0].payload(), b"22.5".to_vec());
    assert_eq!(
        request.response().map(|response| response.payload()),
        Some(b"22.5".to_vec())
    );

    let served = bed.server.deliverer.requests();
    assert_eq!(served.len(), 1);
    assert!(served[0].is_complete());
    assert_eq!(served[0].request().options().uri_path_string(), "sensors/temp");

    bed.destroy().await;
}

#[tokio::test]
async fn non_confirmable_request_gets_non_confirmable_response() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "ok"),
    )
    .await;

    let request = temperature_request(&bed).with_type(MessageType::NonConfirmable);
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();

    assert!(exchange.is_complete());
    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].message_type(),
        Some(MessageType::NonConfirmable)
    );
    // No acknowledgements either way.
    assert_eq!(bed.client.connector.sent_count(), 1);
    assert_eq!(bed.server.connector.sent_count(), 1);

    bed.destroy().await;
}

#[tokio::test]
async fn duplicate_request_is_delivered_once() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "22.5"),
    )
    .await;
    bed.network.duplicate_next(1);

    let exchange = bed
        .client
        .endpoint
        .send_request(temperature_request(&bed))
        .expect("request should be accepted");
    bed.settle();

    assert!(exchange.is_complete());
    assert_eq!(bed.server.deliverer.requests().len(), 1);
    assert_eq!(bed.client.deliverer.responses().len(), 1);
    // The copy overtook the response and was dropped as still in progress.
    assert_eq!(bed.server.connector.sent_count(), 1);

    // A copy arriving after the response is answered from the cache.
    assert!(bed.client.connector.replay(0, support::server_address()));
    bed.settle();

    assert_eq!(bed.server.deliverer.requests().len(), 1);
    assert_eq!(bed.server.connector.sent_count(), 2);
    let sent = bed.server.connector.sent_messages();
    assert_eq!(sent[0].core().mid(), sent[1].core().mid());
    assert_eq!(sent[0].core().payload(), sent[1].core().payload());
    assert_eq!(bed.client.deliverer.responses().len(), 1);

    bed.destroy().await;
}

#[tokio::test]
async fn lost_response_is_resent_from_cache() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "22.5"),
    )
    .await;
    let observer = Arc::new(RecordingMessageObserver::new());
    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());

    let exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    bed.client.executor.run_pending();

    // The server answers, but its response never arrives.
    bed.network.drop_next(1);
    bed.server.executor.run_pending();
    assert_eq!(bed.server.connector.sent_count(), 1);
    assert_eq!(bed.network.dropped(), 1);
    assert!(!exchange.is_complete());

    bed.client.executor.advance(Duration::from_millis(100));
    bed.settle();

    assert_eq!(observer.retransmissions(), 1);
    assert!(exchange.is_complete());
    assert_eq!(bed.server.deliverer.requests().len(), 1);
    assert_eq!(bed.server.connector.sent_count(), 2);
    assert_eq!(bed.client.deliverer.responses().len(), 1);

    let resent = bed.server.connector.sent_messages();
    let mids: Vec<Option<u16>> = resent.iter().map(|message| message.core().mid()).collect();
    assert_eq!(mids, vec![request.mid(), request.mid()]);

    bed.destroy().await;
}

#[tokio::test]
async fn lost_request_is_retransmitted() {
    let bed = Testbed::start(
        support::config(),
        RecordingDeliverer::responding(Code::CONTENT, "22.5"),
    )
    .await;
    let observer = Arc::new(RecordingMessageObserver::new());
    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());

    bed.network.drop_next(1);
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();
    assert!(bed.server.deliverer.requests().is_empty());

    bed.client.executor.advance(Duration::from_millis(99));
    bed.settle();
    assert_eq!(observer.retransmissions(), 0);

    bed.client.executor.advance(Duration::from_millis(1));
    bed.settle();

    assert_eq!(observer.retransmissions(), 1);
    assert_eq!(observer.sent(), 2);
    assert!(exchange.is_complete());
    assert_eq!(bed.client.deliverer.responses().len(), 1);

    bed.destroy().await;
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let bed = Testbed::start(support::config(), RecordingDeliverer::new()).await;
    let observer = Arc::new(RecordingMessageObserver::new());
    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());

    bed.network.drop_next(10);
    let exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    bed.settle();

    bed.client.executor.advance(Duration::from_millis(699));
    assert!(!exchange.is_complete());
    assert_eq!(observer.retransmissions(), 2);

    bed.client.executor.advance(Duration::from_millis(1));
    assert!(exchange.is_complete());
    assert!(request.is_timed_out());
    assert_eq!(observer.timeouts(), 1);
    assert_eq!(observer.send_errors(), vec![SendError::Timeout]);
    assert_eq!(bed.network.dropped(), 3);

    bed.destroy().await;
}

#[tokio::test]
async fn intercepted_cancel_keeps_request_off_the_wire() {
    let bed = Testbed::start(support::config(), RecordingDeliverer::new()).await;
    let interceptor = Arc::new(RecordingInterceptor::canceling_requests());
    let as_trait: Arc<dyn MessageInterceptor> = interceptor.clone();
    bed.client.endpoint.add_interceptor(as_trait.clone());

    let observer = Arc::new(RecordingMessageObserver::new());
    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());
    let exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    bed.settle();

    assert_eq!(interceptor.sent_requests(), 1);
    assert!(request.is_canceled());
    assert_eq!(observer.cancels(), 1);
    assert!(exchange.is_complete());
    assert_eq!(bed.client.connector.sent_count(), 0);

    // The retransmission timer must not resurrect it either.
    bed.client.executor.advance(Duration::from_secs(1));
    assert_eq!(bed.client.connector.sent_count(), 0);

    assert!(bed.client.endpoint.remove_interceptor(&as_trait));
    bed.destroy().await;
}

#[tokio::test]
async fn rejected_request_is_reset() {
    let bed = Testbed::start(support::config(), RecordingDeliverer::new()).await;
    let observer = Arc::new(RecordingMessageObserver::new());
    let request = temperature_request(&bed);
    request.add_message_observer(observer.clone());

    let exchange = bed
        .client
        .endpoint
        .send_request(request.clone())
        .expect("request should be accepted");
    bed.settle();

    let served = bed.server.deliverer.requests();
    assert_eq!(served.len(), 1);
    served[0].send_reject().expect("server endpoint is running");
    bed.settle();

    assert!(request.is_rejected());
    assert_eq!(observer.rejects(), 1);
    assert!(exchange.is_complete());
    let Some(Message::Empty(reset)) = bed.server.connector.sent_messages().pop() else {
        panic!("server should have sent a reset");
    };
    assert_eq!(reset.message_type(), Some(MessageType::Reset));
    assert_eq!(reset.mid(), request.mid());

    bed.destroy().await;
}
