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

//! Plain UDP connector on a tokio socket.

use super::{Connector, ConnectorError, Protocol, RawData, RawDataReceiver};
use crate::error::SendError;
use crate::message::EndpointContext;
use crate::observability::events;
use crate::runtime::{lock, read, write};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const COMPONENT: &str = "udp_connector";
const DEFAULT_DATAGRAM_SIZE: usize = 2_048;

type SharedReceiver = Arc<RwLock<Option<Arc<dyn RawDataReceiver>>>>;

struct RunningSocket {
    receive_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

/// Binds one UDP socket and runs a receive loop plus a send loop fed by a channel.
///
/// Both loops are spawned on the tokio runtime that calls [`Connector::start`].
pub struct UdpConnector {
    bind_address: SocketAddr,
    datagram_size: usize,
    receiver: SharedReceiver,
    running: tokio::sync::Mutex<Option<RunningSocket>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<RawData>>>,
    local_address: Mutex<Option<SocketAddr>>,
    destroyed: AtomicBool,
}

impl UdpConnector {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            datagram_size: DEFAULT_DATAGRAM_SIZE,
            receiver: Arc::new(RwLock::new(None)),
            running: tokio::sync::Mutex::new(None),
            outbound: Mutex::new(None),
            local_address: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Size of the receive buffer; longer datagrams are truncated by the OS.
    pub fn with_datagram_size(mut self, datagram_size: usize) -> Self {
        self.datagram_size = datagram_size.max(1);
        self
    }

    async fn receive_loop(socket: Arc<UdpSocket>, receiver: SharedReceiver, datagram_size: usize) {
        let mut buffer = vec![0_u8; datagram_size];
        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((length, peer)) => {
                    let raw = RawData::inbound(buffer[..length].to_vec(), EndpointContext::new(peer));
                    let current = read(&receiver).clone();
                    let Some(current) = current else {
                        debug!(
                            event = events::CONNECTOR_RECEIVE_FAILED,
                            component = COMPONENT,
                            peer = %peer,
                            "no receiver installed; dropping datagram"
                        );
                        continue;
                    };
                    if let Err(err) = current.receive_data(raw) {
                        debug!(
                            event = events::CONNECTOR_RECEIVE_FAILED,
                            component = COMPONENT,
                            peer = %peer,
                            err = %err,
                            "inbound datagram rejected"
                        );
                    }
                }
                Err(err) => {
                    // ICMP errors for earlier sends surface here on some platforms.
                    warn!(
                        event = events::CONNECTOR_RECEIVE_FAILED,
                        component = COMPONENT,
                        err = %err,
                        "udp receive failed"
                    );
                }
            }
        }
    }

    async fn send_loop(socket: Arc<UdpSocket>, mut outbound: mpsc::UnboundedReceiver<RawData>) {
        while let Some(mut raw) = outbound.recv().await {
            let callback = raw.take_callback();
            let Some(destination) = raw.context().map(EndpointContext::peer) else {
                if let Some(callback) = callback {
                    callback.on_error(SendError::Transport("missing destination".to_string()));
                }
                continue;
            };

            match socket.send_to(raw.bytes(), destination).await {
                Ok(sent) => {
                    trace!(
                        event = events::EGRESS_SEND_OK,
                        component = COMPONENT,
                        peer = %destination,
                        bytes = sent,
                        "udp datagram sent"
                    );
                    if let Some(callback) = callback {
                        callback.on_sent();
                    }
                }
                Err(err) => {
                    debug!(
                        event = events::EGRESS_SEND_FAILED,
                        component = COMPONENT,
                        peer = %destination,
                        err = %err,
                        "udp send failed"
                    );
                    if let Some(callback) = callback {
                        callback.on_error(SendError::Transport(err.to_string()));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    async fn start(&self) -> Result<(), ConnectorError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ConnectorError::Destroyed);
        }
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind_address)
            .await
            .map_err(ConnectorError::Bind)?;
        let local = socket.local_addr().map_err(ConnectorError::Bind)?;
        let socket = Arc::new(socket);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let receive_task = tokio::spawn(Self::receive_loop(
            socket.clone(),
            self.receiver.clone(),
            self.datagram_size,
        ));
        let send_task = tokio::spawn(Self::send_loop(socket, outbound_rx));

        *lock(&self.outbound) = Some(outbound_tx);
        *lock(&self.local_address) = Some(local);
        *running = Some(RunningSocket {
            receive_task,
            send_task,
        });

        info!(
            event = events::CONNECTOR_BIND_OK,
            component = COMPONENT,
            local = %local,
            "udp connector bound"
        );
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        lock(&self.outbound).take();
        lock(&self.local_address).take();
        running.receive_task.abort();
        running.send_task.abort();
        info!(
            event = events::CONNECTOR_STOPPED,
            component = COMPONENT,
            "udp connector stopped"
        );
    }

    async fn destroy(&self) {
        self.stop().await;
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn send(&self, raw: RawData) {
        let rejected = match lock(&self.outbound).as_ref() {
            Some(outbound) => outbound.send(raw).err().map(|err| err.0),
            None => Some(raw),
        };
        if let Some(mut raw) = rejected {
            if let Some(callback) = raw.take_callback() {
                callback.on_error(SendError::ConnectorStopped);
            }
        }
    }

    fn set_receiver(&self, receiver: Arc<dyn RawDataReceiver>) {
        *write(&self.receiver) = Some(receiver);
    }

    fn address(&self) -> Option<SocketAddr> {
        *lock(&self.local_address)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }
}
