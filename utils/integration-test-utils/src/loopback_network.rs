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

use crate::lock;
use async_trait::async_trait;
use coap_endpoint::message::{EndpointContext, Message};
use coap_endpoint::transport::codec::codec_for;
use coap_endpoint::transport::{Connector, ConnectorError, Protocol, RawData, RawDataReceiver};
use coap_endpoint::SendError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

#[derive(Default)]
struct NetworkState {
    connectors: HashMap<SocketAddr, Weak<LoopbackConnector>>,
    drop_next: usize,
    duplicate_next: usize,
    delivered: usize,
    dropped: usize,
}

/// In-memory datagram network joining [`LoopbackConnector`]s by address.
///
/// Delivery happens on the sending thread; the receiving endpoint still
/// schedules the work on its own executor.
#[derive(Default)]
pub struct Network {
    state: Mutex<NetworkState>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a connector bound to `address` on this network.
    pub fn connector(self: &Arc<Self>, address: SocketAddr) -> Arc<LoopbackConnector> {
        let connector = Arc::new(LoopbackConnector {
            address,
            network: Arc::downgrade(self),
            receiver: Mutex::new(None),
            running: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        });
        lock(&self.state)
            .connectors
            .insert(address, Arc::downgrade(&connector));
        connector
    }

    /// Silently loses the next `count` datagrams.
    pub fn drop_next(&self, count: usize) {
        lock(&self.state).drop_next = count;
    }

    /// Delivers each of the next `count` datagrams twice.
    pub fn duplicate_next(&self, count: usize) {
        lock(&self.state).duplicate_next = count;
    }

    pub fn delivered(&self) -> usize {
        lock(&self.state).delivered
    }

    pub fn dropped(&self) -> usize {
        lock(&self.state).dropped
    }

    fn transmit(&self, source: SocketAddr, destination: SocketAddr, bytes: &[u8]) {
        let (target, copies) = {
            let mut state = lock(&self.state);
            if state.drop_next > 0 {
                state.drop_next -= 1;
                state.dropped += 1;
                debug!(%source, %destination, "loopback network dropped datagram");
                return;
            }
            let copies = if state.duplicate_next > 0 {
                state.duplicate_next -= 1;
                2
            } else {
                1
            };
            let target = state.connectors.get(&destination).and_then(Weak::upgrade);
            if target.is_some() {
                state.delivered += copies;
            }
            (target, copies)
        };

        let Some(target) = target else {
            debug!(%destination, "no loopback connector at destination");
            return;
        };
        for _ in 0..copies {
            target.receive(bytes.to_vec(), source);
        }
    }
}

/// Connector attached to a [`Network`].
pub struct LoopbackConnector {
    address: SocketAddr,
    network: Weak<Network>,
    receiver: Mutex<Option<Arc<dyn RawDataReceiver>>>,
    running: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackConnector {
    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Every datagram this connector sent, parsed back into messages.
    pub fn sent_messages(&self) -> Vec<Message> {
        let codec = codec_for(Protocol::Udp);
        lock(&self.sent)
            .iter()
            .filter_map(|bytes| codec.parse(bytes).ok())
            .collect()
    }

    /// Puts the `index`th datagram this connector sent on the network again,
    /// without recording it as sent. Returns `false` if there is no such datagram.
    pub fn replay(&self, index: usize, destination: SocketAddr) -> bool {
        let Some(bytes) = lock(&self.sent).get(index).cloned() else {
            return false;
        };
        let Some(network) = self.network.upgrade() else {
            return false;
        };
        network.transmit(self.address, destination, &bytes);
        true
    }

    fn receive(&self, bytes: Vec<u8>, source: SocketAddr) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let receiver = lock(&self.receiver).clone();
        if let Some(receiver) = receiver {
            if let Err(err) = receiver.receive_data(RawData::inbound(bytes, EndpointContext::new(source))) {
                debug!(address = %self.address, err = %err, "loopback receiver rejected datagram");
            }
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn start(&self) -> Result<(), ConnectorError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn destroy(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.receiver).take();
    }

    fn send(&self, mut raw: RawData) {
        let callback = raw.take_callback();
        if !self.running.load(Ordering::SeqCst) {
            if let Some(callback) = callback {
                callback.on_error(SendError::ConnectorStopped);
            }
            return;
        }
        let Some(destination) = raw.context().map(EndpointContext::peer) else {
            if let Some(callback) = callback {
                callback.on_error(SendError::Transport("missing destination".to_string()));
            }
            return;
        };

        lock(&self.sent).push(raw.bytes().to_vec());
        if let Some(callback) = callback {
            callback.on_sent();
        }
        if let Some(network) = self.network.upgrade() {
            network.transmit(self.address, destination, raw.bytes());
        }
    }

    fn set_receiver(&self, receiver: Arc<dyn RawDataReceiver>) {
        *lock(&self.receiver) = Some(receiver);
    }

    fn address(&self) -> Option<SocketAddr> {
        Some(self.address)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}
