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
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::net::SocketAddr;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub(crate) bind_address: SocketAddr,
    #[serde(default)]
    pub(crate) endpoint_config: EndpointConfig,
    #[serde(default)]
    pub(crate) resources: Vec<ResourceConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub(crate) path: String,
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) writable: bool,
}

impl Config {
    pub fn from_json5(contents: &str) -> Result<Self, Box<dyn Error>> {
        let config: Config = json5::from_str(contents)?;
        config.endpoint_config.validate()?;

        let mut seen = HashSet::new();
        for resource in &config.resources {
            if !seen.insert(resource.path.trim_matches('/')) {
                return Err(format!("Duplicate resource path found: {}", resource.path).into());
            }
        }
        Ok(config)
    }
}
