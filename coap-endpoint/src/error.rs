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

//! Errors surfaced by the endpoint facade and delivered to message observers.

use crate::config::ConfigError;
use crate::stack::StackError;
use crate::transport::ConnectorError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported on a message through [`crate::message::MessageObserver::on_send_error`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendError {
    /// The connector failed to put the bytes on the wire.
    Transport(String),
    /// Confirmable retransmissions were exhausted without an acknowledgement.
    Timeout,
    ConnectorStopped,
    Serialization(String),
    /// Token or message ID registration failed in the matcher.
    Registration(String),
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Transport(reason) => write!(f, "transport failed to send message: {reason}"),
            SendError::Timeout => write!(f, "retransmissions exhausted without acknowledgement"),
            SendError::ConnectorStopped => write!(f, "connector is not running"),
            SendError::Serialization(reason) => write!(f, "failed to serialize message: {reason}"),
            SendError::Registration(reason) => write!(f, "failed to register message: {reason}"),
        }
    }
}

impl Error for SendError {}

/// Caller contract violations and lifecycle failures of [`crate::Endpoint`].
#[derive(Debug)]
pub enum EndpointError {
    MissingDestination,
    /// No executor is available because the endpoint was never started.
    NotStarted,
    /// The operation is only allowed while the endpoint is stopped.
    AlreadyStarted,
    Destroyed,
    /// The default protocol stage thread could not be spawned.
    Executor(std::io::Error),
    InvalidConfig(ConfigError),
    Connector(ConnectorError),
    Stack(StackError),
}

impl Display for EndpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::MissingDestination => write!(f, "message has no destination context"),
            EndpointError::NotStarted => write!(f, "endpoint has not been started"),
            EndpointError::AlreadyStarted => write!(f, "endpoint is already started"),
            EndpointError::Destroyed => write!(f, "endpoint has been destroyed"),
            EndpointError::Executor(err) => write!(f, "failed to spawn protocol stage: {err}"),
            EndpointError::InvalidConfig(err) => write!(f, "invalid endpoint configuration: {err}"),
            EndpointError::Connector(err) => write!(f, "connector failure: {err}"),
            EndpointError::Stack(err) => write!(f, "protocol stack failure: {err}"),
        }
    }
}

impl Error for EndpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EndpointError::Executor(err) => Some(err),
            EndpointError::InvalidConfig(err) => Some(err),
            EndpointError::Connector(err) => Some(err),
            EndpointError::Stack(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConnectorError> for EndpointError {
    fn from(err: ConnectorError) -> Self {
        EndpointError::Connector(err)
    }
}

impl From<StackError> for EndpointError {
    fn from(err: StackError) -> Self {
        match err {
            StackError::MissingDestination => EndpointError::MissingDestination,
            other => EndpointError::Stack(other),
        }
    }
}

impl From<ConfigError> for EndpointError {
    fn from(err: ConfigError) -> Self {
        EndpointError::InvalidConfig(err)
    }
}
