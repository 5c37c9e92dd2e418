use crate::calculator::BonusRates;
use crate::constants::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONTRACT_ADDRESS, DEFAULT_DEVNET_URL, HARDHAT_CHAIN_ID,
};
use crate::errors::PayrollError;
use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How `paySalary` carries the amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Encrypt the plan total and pass it with the call.
    EncryptedAmount,
    /// Let the program settle the base salary it stored at `addEmployee`.
    StoredSalary,
}

impl FromStr for PaymentMode {
    type Err = PayrollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encrypted_amount" => Ok(PaymentMode::EncryptedAmount),
            "stored_salary" => Ok(PaymentMode::StoredSalary),
            other => Err(PayrollError::Config(format!("unknown payment mode '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayrollConfig {
    /// Network the payroll program is deployed on.
    pub chain_id: ChainId,
    pub contract_address: Address,
    #[serde(with = "duration_secs")]
    pub confirmation_timeout: Duration,
    pub payment_mode: PaymentMode,
    pub bonus_rates: BonusRates,
    pub devnet_url: String,
    pub api_key: Option<String>,
}

impl Default for PayrollConfig {
    fn default() -> Self {
        Self {
            chain_id: HARDHAT_CHAIN_ID,
            contract_address: DEFAULT_CONTRACT_ADDRESS
                .parse()
                .unwrap_or(Address([0u8; 20])),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            payment_mode: PaymentMode::EncryptedAmount,
            bonus_rates: BonusRates::default(),
            devnet_url: DEFAULT_DEVNET_URL.to_string(),
            api_key: None,
        }
    }
}

impl PayrollConfig {
    /// Defaults overridden by `PAYROLL_*` environment variables.
    pub fn from_env() -> Result<Self, PayrollError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PayrollError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("PAYROLL_CHAIN_ID") {
            cfg.chain_id = v
                .parse()
                .map_err(|_| PayrollError::Config(format!("PAYROLL_CHAIN_ID: '{v}' is not a number")))?;
        }
        if let Some(v) = lookup("PAYROLL_CONTRACT_ADDRESS") {
            cfg.contract_address = v
                .parse()
                .map_err(|e| PayrollError::Config(format!("PAYROLL_CONTRACT_ADDRESS: {e}")))?;
        }
        if let Some(v) = lookup("PAYROLL_CONFIRMATION_TIMEOUT_SECS") {
            let secs: u64 = v.parse().map_err(|_| {
                PayrollError::Config(format!("PAYROLL_CONFIRMATION_TIMEOUT_SECS: '{v}' is not a number"))
            })?;
            if secs == 0 {
                return Err(PayrollError::Config("confirmation timeout must be positive".to_string()));
            }
            cfg.confirmation_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("PAYROLL_PAYMENT_MODE") {
            cfg.payment_mode = v.parse()?;
        }
        if let Some(v) = lookup("PAYROLL_DEVNET_URL") {
            cfg.devnet_url = v.trim_end_matches('/').to_string();
        }
        cfg.api_key = lookup("PAYROLL_API_KEY");

        Ok(cfg)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
