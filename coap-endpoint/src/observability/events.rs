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

//! Canonical structured event names used across `coap-endpoint`.

// Endpoint lifecycle events.
pub const ENDPOINT_START: &str = "endpoint_start";
pub const ENDPOINT_START_OK: &str = "endpoint_start_ok";
pub const ENDPOINT_START_FAILED: &str = "endpoint_start_failed";
pub const ENDPOINT_ALREADY_STARTED: &str = "endpoint_already_started";
pub const ENDPOINT_STOP: &str = "endpoint_stop";
pub const ENDPOINT_ALREADY_STOPPED: &str = "endpoint_already_stopped";
pub const ENDPOINT_DESTROY: &str = "endpoint_destroy";
pub const ENDPOINT_DEFAULT_EXECUTOR: &str = "endpoint_default_executor";
pub const ENDPOINT_DEFAULT_DELIVERER: &str = "endpoint_default_deliverer";
pub const ENDPOINT_OBSERVER_PANICKED: &str = "endpoint_observer_panicked";
pub const DELIVERER_REQUEST_REJECTED: &str = "deliverer_request_rejected";

// Egress pipeline events.
pub const EGRESS_SEND_ATTEMPT: &str = "egress_send_attempt";
pub const EGRESS_SEND_OK: &str = "egress_send_ok";
pub const EGRESS_SEND_FAILED: &str = "egress_send_failed";
pub const EGRESS_CANCELED: &str = "egress_canceled";
pub const EGRESS_SERIALIZE_FAILED: &str = "egress_serialize_failed";
pub const EGRESS_REGISTER_FAILED: &str = "egress_register_failed";

// Ingress pipeline events.
pub const INGRESS_RECEIVE: &str = "ingress_receive";
pub const INGRESS_BOUNDARY_REJECTED: &str = "ingress_boundary_rejected";
pub const INGRESS_MALFORMED_REJECTED: &str = "ingress_malformed_rejected";
pub const INGRESS_MALFORMED_DROPPED: &str = "ingress_malformed_dropped";
pub const INGRESS_UNMATCHED_RESPONSE: &str = "ingress_unmatched_response";
pub const INGRESS_UNMATCHED_EMPTY: &str = "ingress_unmatched_empty";
pub const INGRESS_PING: &str = "ingress_ping";
pub const INGRESS_CANCELED: &str = "ingress_canceled";

// Matching events.
pub const MATCHER_DUPLICATE: &str = "matcher_duplicate";
pub const MATCHER_CONTEXT_MISMATCH: &str = "matcher_context_mismatch";
pub const MATCHER_MID_MISMATCH: &str = "matcher_mid_mismatch";
pub const MATCHER_TOKEN_IN_USE: &str = "matcher_token_in_use";
pub const MATCHER_SWEEP: &str = "matcher_sweep";
pub const MATCHER_CLEAR: &str = "matcher_clear";
pub const EXCHANGE_COMPLETE: &str = "exchange_complete";

// Processing stack events.
pub const STACK_TASK_FAILED: &str = "stack_task_failed";
pub const RELIABILITY_RETRANSMIT: &str = "reliability_retransmit";
pub const RELIABILITY_TIMEOUT: &str = "reliability_timeout";
pub const RELIABILITY_DUPLICATE: &str = "reliability_duplicate";
pub const BLOCKWISE_NEXT_BLOCK: &str = "blockwise_next_block";
pub const BLOCKWISE_ASSEMBLED: &str = "blockwise_assembled";
pub const BLOCKWISE_ABORTED: &str = "blockwise_aborted";
pub const OBSERVE_NOTIFICATION: &str = "observe_notification";
pub const OBSERVE_STALE_NOTIFICATION: &str = "observe_stale_notification";
pub const OBSERVE_RELATION_ESTABLISHED: &str = "observe_relation_established";
pub const OBSERVE_RELATION_CANCELED: &str = "observe_relation_canceled";
pub const MESSAGE_TRACE: &str = "message_trace";

// Runtime and transport events.
pub const RUNTIME_SPAWN_START: &str = "runtime_spawn_start";
pub const RUNTIME_SPAWN_OK: &str = "runtime_spawn_ok";
pub const RUNTIME_SPAWN_FAILED: &str = "runtime_spawn_failed";
pub const RUNTIME_TASK_PANICKED: &str = "runtime_task_panicked";
pub const RUNTIME_TASK_DROPPED: &str = "runtime_task_dropped";
pub const RUNTIME_SHUTDOWN: &str = "runtime_shutdown";
pub const CONNECTOR_BIND_OK: &str = "connector_bind_ok";
pub const CONNECTOR_RECEIVE_FAILED: &str = "connector_receive_failed";
pub const CONNECTOR_STOPPED: &str = "connector_stopped";
