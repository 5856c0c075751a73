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

mod config;
mod resources;

use crate::config::Config;
use crate::resources::StaticResources;
use clap::Parser;
use coap_endpoint::transport::UdpConnector;
use coap_endpoint::{Endpoint, MessageTracer};
use std::error::Error;
use std::fs;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command()]
struct EndpointArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
    /// Log every message crossing the endpoint.
    #[arg(short, long)]
    trace_messages: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    info!("Started configurable-endpoint");

    let args = EndpointArgs::parse();
    let contents = fs::read_to_string(&args.config)
        .map_err(|e| format!("Unable to read config file {}: {e:?}", args.config))?;
    let config = Config::from_json5(&contents)
        .map_err(|e| format!("Unable to parse config file: {e}"))?;

    let connector = Arc::new(UdpConnector::new(config.bind_address));
    let endpoint = Endpoint::builder(connector)
        .config(config.endpoint_config.clone())
        .message_deliverer(Arc::new(StaticResources::new(&config.resources)))
        .build()?;
    if args.trace_messages {
        endpoint.add_interceptor(Arc::new(MessageTracer::new()));
    }

    endpoint.start().await?;
    info!(
        uri = endpoint.uri().unwrap_or_default().as_str(),
        resources = config.resources.len(),
        "Serving resources"
    );

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    endpoint.destroy().await;
    Ok(())
}
