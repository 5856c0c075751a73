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

use coap_endpoint::config::EndpointConfig;
use coap_endpoint::message::EndpointContext;
use coap_endpoint::Endpoint;
use integration_test_utils::{LoopbackConnector, ManualExecutor, Network, RecordingDeliverer};
use std::net::SocketAddr;
use std::sync::Arc;

pub(crate) fn client_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_001))
}

pub(crate) fn server_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5683))
}

#[allow(dead_code)]
pub(crate) fn client_context() -> EndpointContext {
    EndpointContext::new(client_address())
}

/// Short deterministic timers: 100 ms, 200 ms, 400 ms, then timeout.
pub(crate) fn config() -> EndpointConfig {
    EndpointConfig {
        ack_timeout_ms: 100,
        ack_random_factor: 1.0,
        ack_timeout_scale: 2.0,
        max_retransmit: 2,
        ..EndpointConfig::default()
    }
}

pub(crate) struct Peer {
    pub(crate) endpoint: Endpoint,
    pub(crate) connector: Arc<LoopbackConnector>,
    pub(crate) executor: Arc<ManualExecutor>,
    pub(crate) deliverer: Arc<RecordingDeliverer>,
}

impl Peer {
    async fn start(
        network: &Arc<Network>,
        address: SocketAddr,
        config: EndpointConfig,
        deliverer: RecordingDeliverer,
    ) -> Self {
        let connector = network.connector(address);
        let executor = ManualExecutor::new();
        let deliverer = Arc::new(deliverer);
        let endpoint = Endpoint::builder(connector.clone())
            .config(config)
            .executor(executor.clone())
            .message_deliverer(deliverer.clone())
            .build()
            .expect("test config should be valid");
        endpoint.start().await.expect("loopback endpoint should start");
        Self {
            endpoint,
            connector,
            executor,
            deliverer,
        }
    }
}

/// A client and a server endpoint on one in-memory network, each on its own
/// manually driven executor.
pub(crate) struct Testbed {
    pub(crate) network: Arc<Network>,
    pub(crate) client: Peer,
    pub(crate) server: Peer,
}

impl Testbed {
    pub(crate) async fn start(config: EndpointConfig, server_deliverer: RecordingDeliverer) -> Self {
        integration_test_utils::init_logging();
        let network = Network::new();
        let client = Peer::start(
            &network,
            client_address(),
            config.clone(),
            RecordingDeliverer::new(),
        )
        .await;
        let server = Peer::start(&network, server_address(), config, server_deliverer).await;
        Self {
            network,
            client,
            server,
        }
    }

    pub(crate) fn server_context(&self) -> EndpointContext {
        EndpointContext::new(server_address())
    }

    /// Runs both executors until neither has queued work left.
    pub(crate) fn settle(&self) {
        loop {
            let ran = self.client.executor.run_pending() + self.server.executor.run_pending();
            if ran == 0 {
                return;
            }
        }
    }

    #[allow(dead_code)]
    pub(crate) async fn destroy(self) {
        self.client.endpoint.destroy().await;
        self.server.endpoint.destroy().await;
    }
}
