use crate::errors::ApiError;
use payroll_core::constants::{DEFAULT_CONTRACT_ADDRESS, HARDHAT_CHAIN_ID};
use payroll_core::types::{Address, ChainId};
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8545";
pub const DEFAULT_API_KEY: &str = "dev-secret-key";

#[derive(Clone, Debug)]
pub struct DevnetConfig {
    pub addr: String,
    pub chain_id: ChainId,
    pub contract: Address,
    pub api_key: String,
    pub data_dir: PathBuf,
}

impl DevnetConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let chain_id = match lookup("DEVNET_CHAIN_ID") {
            Some(v) => v
                .parse()
                .map_err(|_| ApiError::Config(format!("DEVNET_CHAIN_ID: '{v}' is not a number")))?,
            None => HARDHAT_CHAIN_ID,
        };
        let contract = lookup("DEVNET_CONTRACT_ADDRESS")
            .unwrap_or_else(|| DEFAULT_CONTRACT_ADDRESS.to_string())
            .parse()
            .map_err(|e| ApiError::Config(format!("DEVNET_CONTRACT_ADDRESS: {e}")))?;

        Ok(Self {
            addr: lookup("DEVNET_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            chain_id,
            contract,
            api_key: lookup("API_KEY").unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            data_dir: lookup("DEVNET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
        })
    }
}
