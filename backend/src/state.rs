use crate::config::DevnetConfig;
use crate::db::Db;
use payroll_core::types::NetworkInfo;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub network: NetworkInfo,
    pub api_key: Arc<str>,
    /// Serializes every state-changing request, so each transaction is its own block.
    pub writer: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: Db, config: &DevnetConfig) -> Self {
        Self {
            db,
            network: NetworkInfo {
                chain_id: config.chain_id,
                contract: config.contract,
            },
            api_key: Arc::from(config.api_key.as_str()),
            writer: Arc::new(Mutex::new(())),
        }
    }
}
