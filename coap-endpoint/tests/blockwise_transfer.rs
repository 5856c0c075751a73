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

use coap_endpoint::config::EndpointConfig;
use coap_endpoint::message::{Code, Message, Request};
use integration_test_utils::RecordingDeliverer;
use support::Testbed;

const BODY_LEN: usize = 100;

fn small_blocks() -> EndpointConfig {
    EndpointConfig {
        max_message_size: 64,
        preferred_block_size: 32,
        ..support::config()
    }
}

fn body() -> Vec<u8> {
    (0..BODY_LEN).map(|i| (i % 251) as u8).collect()
}

fn block2_numbers(messages: &[Message]) -> Vec<Option<u32>> {
    messages
        .iter()
        .map(|message| message.core().options().block2.map(|block| block.num()))
        .collect()
}

#[tokio::test]
async fn large_response_is_downloaded_block_by_block() {
    let bed = Testbed::start(
        small_blocks(),
        RecordingDeliverer::responding(Code::CONTENT, body()),
    )
    .await;

    let request = Request::get()
        .with_destination(bed.server_context())
        .with_uri_path("firmware");
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();

    assert!(exchange.is_complete());
    // Only the first request reaches the application; the rest come from the cache.
    assert_eq!(bed.server.deliverer.requests().len(), 1);

    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), Code::CONTENT);
    assert_eq!(responses[0].payload(), body());
    assert!(responses[0].options().block2.is_none());

    let requests = bed.client.connector.sent_messages();
    assert_eq!(block2_numbers(&requests), vec![None, Some(1), Some(2), Some(3)]);
    let blocks = bed.server.connector.sent_messages();
    assert_eq!(
        block2_numbers(&blocks),
        vec![Some(0), Some(1), Some(2), Some(3)]
    );
    let last = blocks.last().expect("four blocks were sent");
    assert_eq!(last.core().payload_len(), BODY_LEN - 3 * 32);
    assert!(!last.core().options().block2.is_some_and(|block| block.more()));

    bed.destroy().await;
}

#[tokio::test]
async fn large_request_is_uploaded_block_by_block() {
    let bed = Testbed::start(
        small_blocks(),
        RecordingDeliverer::responding(Code::CHANGED, "stored"),
    )
    .await;

    let request = Request::put()
        .with_destination(bed.server_context())
        .with_uri_path("config")
        .with_payload(body());
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();

    assert!(exchange.is_complete());
    let uploads = bed.server.deliverer.requests();
    assert_eq!(uploads.len(), 1);
    let assembled = uploads[0].request();
    assert_eq!(assembled.payload(), body());
    assert!(assembled.options().block1.is_none());

    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), Code::CHANGED);
    assert_eq!(responses[0].payload(), b"stored".to_vec());

    let codes: Vec<Code> = bed
        .server
        .connector
        .sent_messages()
        .iter()
        .map(|message| message.core().code())
        .collect();
    assert_eq!(
        codes,
        vec![Code::CONTINUE, Code::CONTINUE, Code::CONTINUE, Code::CHANGED]
    );

    bed.destroy().await;
}

#[tokio::test]
async fn upload_above_body_limit_is_refused_up_front() {
    let config = EndpointConfig {
        max_resource_body_size: 64,
        ..small_blocks()
    };
    let bed = Testbed::start(config, RecordingDeliverer::responding(Code::CHANGED, "stored")).await;

    let request = Request::put()
        .with_destination(bed.server_context())
        .with_uri_path("config")
        .with_payload(body());
    let exchange = bed
        .client
        .endpoint
        .send_request(request)
        .expect("request should be accepted");
    bed.settle();

    assert!(exchange.is_complete());
    assert!(bed.server.deliverer.requests().is_empty());
    let responses = bed.client.deliverer.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), Code::REQUEST_ENTITY_TOO_LARGE);
    assert_eq!(bed.client.connector.sent_count(), 1);

    bed.destroy().await;
}
