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

//! Endpoint tuning parameters.
//!
//! Defaults follow RFC 7252 §4.8 (transmission parameters), RFC 7959 (block sizes)
//! and RFC 7641 (notification reliability checks).

use crate::message::{BlockOption, MAX_TOKEN_LENGTH};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    pub ack_timeout_ms: u64,
    pub ack_random_factor: f64,
    pub ack_timeout_scale: f64,
    pub max_retransmit: u32,
    /// How long a (MID, peer) pair is remembered for duplicate detection.
    pub exchange_lifetime_ms: u64,
    pub non_lifetime_ms: u64,
    pub mark_and_sweep_interval_ms: u64,
    pub token_size_limit: usize,
    /// Payloads above this size are sent blockwise.
    pub max_message_size: usize,
    pub preferred_block_size: usize,
    pub max_resource_body_size: usize,
    pub blockwise_status_lifetime_ms: u64,
    /// Every n-th notification is sent confirmable.
    pub notification_check_interval_count: u32,
    pub notification_check_interval_ms: u64,
    pub udp_datagram_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2_000,
            ack_random_factor: 1.5,
            ack_timeout_scale: 2.0,
            max_retransmit: 4,
            exchange_lifetime_ms: 247_000,
            non_lifetime_ms: 145_000,
            mark_and_sweep_interval_ms: 10_000,
            token_size_limit: MAX_TOKEN_LENGTH,
            max_message_size: 1_024,
            preferred_block_size: 512,
            max_resource_body_size: 8_192,
            blockwise_status_lifetime_ms: 300_000,
            notification_check_interval_count: 100,
            notification_check_interval_ms: 86_400_000,
            udp_datagram_size: 2_048,
        }
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::new("ack_timeout_ms", "must be greater than zero"));
        }
        if self.ack_random_factor < 1.0 {
            return Err(ConfigError::new("ack_random_factor", "must be at least 1.0"));
        }
        if self.ack_timeout_scale < 1.0 {
            return Err(ConfigError::new("ack_timeout_scale", "must be at least 1.0"));
        }
        if self.token_size_limit == 0 || self.token_size_limit > MAX_TOKEN_LENGTH {
            return Err(ConfigError::new("token_size_limit", "must be between 1 and 8"));
        }
        if self.mark_and_sweep_interval_ms == 0 {
            return Err(ConfigError::new(
                "mark_and_sweep_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.preferred_block_size < BlockOption::size_for_szx(0)
            || self.preferred_block_size > BlockOption::size_for_szx(BlockOption::MAX_SZX)
        {
            return Err(ConfigError::new(
                "preferred_block_size",
                "must be between 16 and 1024",
            ));
        }
        if self.max_message_size < self.preferred_block_size {
            return Err(ConfigError::new(
                "max_message_size",
                "must not be smaller than preferred_block_size",
            ));
        }
        if self.max_resource_body_size < self.max_message_size {
            return Err(ConfigError::new(
                "max_resource_body_size",
                "must not be smaller than max_message_size",
            ));
        }
        if self.udp_datagram_size == 0 {
            return Err(ConfigError::new("udp_datagram_size", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn exchange_lifetime(&self) -> Duration {
        Duration::from_millis(self.exchange_lifetime_ms)
    }

    pub fn non_lifetime(&self) -> Duration {
        Duration::from_millis(self.non_lifetime_ms)
    }

    pub fn mark_and_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.mark_and_sweep_interval_ms)
    }

    pub fn blockwise_status_lifetime(&self) -> Duration {
        Duration::from_millis(self.blockwise_status_lifetime_ms)
    }

    pub fn notification_check_interval(&self) -> Duration {
        Duration::from_millis(self.notification_check_interval_ms)
    }

    pub fn preferred_block_szx(&self) -> u8 {
        BlockOption::szx_for_size(self.preferred_block_size)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigError {
    field: &'static str,
    reason: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

impl Error for ConfigError {}
