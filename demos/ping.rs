//! Ping - send a few requests to a running daemon.
//!
//! This example demonstrates:
//! - Building a client with the fluent builder
//! - Fire-and-callback requests with `send_request`
//! - Awaiting a single response with `call`
//!
//! # Running
//!
//! Start the lighting daemon, then:
//!
//! ```text
//! RUST_LOG=lumen_rpc=debug cargo run --example ping -- 127.0.0.1:9010
//! ```

use std::time::Duration;

use lumen_rpc::{RpcClient, DEFAULT_ADDRESS};
use serde::Serialize;

/// DMX frame for one universe.
#[derive(Serialize, Debug)]
struct DmxData {
    universe: u32,
    data: Vec<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let address = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_ADDRESS,
    };

    let client = RpcClient::builder().address(address).build();
    client.start()?;

    // Fire-and-callback: the callback runs only if the daemon answers.
    client.send_request(
        "UpdateDmxData",
        DmxData {
            universe: 1,
            data: vec![255; 512],
        },
        |ack: Option<bool>| async move {
            tracing::info!("DMX update acknowledged: {:?}", ack);
        },
    );

    let plugins = tokio::time::timeout(
        Duration::from_secs(5),
        client.call::<_, Vec<String>>("GetPlugins", ()),
    )
    .await;

    match plugins {
        Ok(Ok(plugins)) => tracing::info!("Plugins: {:?}", plugins),
        Ok(Err(e)) => tracing::warn!("GetPlugins dropped: {}", e),
        Err(_) => tracing::warn!("GetPlugins timed out"),
    }

    client.shutdown();
    Ok(())
}
