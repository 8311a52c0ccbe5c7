mod client;
pub mod events;

use alloy::{primitives::Address, transports::http::reqwest::Url};
pub use client::RpcEventSource;
use serde::Deserialize;
use serde_with::serde_as;

/// Connection settings for the JSON-RPC event source.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct EvmRpcConfig {
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub url: Url,

    /// Address of the contract emitting the commitment events.
    pub contract_address: Address,

    /// Maximum number of blocks covered by a single `eth_getLogs` call.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

fn default_max_block_range() -> u64 {
    10_000
}
