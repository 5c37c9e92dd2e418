//! HTTP adapter for the local devnet (`payroll-devnet`).
//!
//! One client serves as both the ledger transport and the encryption relayer, mirroring how a
//! local node and its relayer are usually reached through one endpoint.

use crate::config::PayrollConfig;
use crate::encryption::EncryptionService;
use crate::errors::PayrollError;
use crate::ledger::LedgerProgram;
use crate::types::{
    Address, Amount, CiphertextHandle, CompanyInfo, EmployeeInfo, EncryptRequest, EncryptResponse, LedgerCall,
    NetworkInfo, TxHash, TxReceipt, TxSubmission, TxSubmitted,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Header carrying the devnet API key on mutating routes.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Request paths served by the devnet.
pub mod paths {
    use crate::types::{Address, TxHash};

    pub const HEALTH: &str = "/health";
    pub const NETWORK: &str = "/api/v1/network";
    pub const ENCRYPT: &str = "/api/v1/relayer/encrypt";
    pub const TRANSACTIONS: &str = "/api/v1/transactions";
    pub const FAUCET: &str = "/api/v1/faucet";

    pub fn transaction(tx_hash: &TxHash) -> String {
        format!("{TRANSACTIONS}/{tx_hash}")
    }

    pub fn account(address: &Address) -> String {
        format!("/api/v1/accounts/{address}")
    }

    pub fn company(company: &Address) -> String {
        format!("/api/v1/companies/{company}")
    }

    pub fn company_employees(company: &Address) -> String {
        format!("/api/v1/companies/{company}/employees")
    }

    pub fn employee(company: &Address, employee: &Address) -> String {
        format!("/api/v1/companies/{company}/employees/{employee}")
    }

    pub fn employee_salary(company: &Address, employee: &Address) -> String {
        format!("/api/v1/companies/{company}/employees/{employee}/salary")
    }

    pub fn company_payroll(company: &Address) -> String {
        format!("/api/v1/companies/{company}/payroll")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetRequest {
    pub address: Address,
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub address: Address,
    pub balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyEmployees {
    pub company: Address,
    pub employees: Vec<Address>,
}

/// An encrypted value exposed by a read view, as its handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedView {
    pub handle: CiphertextHandle,
}

/// Body of every devnet error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A failed HTTP exchange, before it is mapped for the calling concern.
#[derive(Debug)]
enum HttpFailure {
    Status(StatusCode, String),
    Network(String),
}

impl HttpFailure {
    fn into_ledger_error(self) -> PayrollError {
        match self {
            HttpFailure::Status(StatusCode::UNAUTHORIZED, m) => PayrollError::Unauthorized(m),
            HttpFailure::Status(StatusCode::NOT_FOUND, m) => PayrollError::NotFound(m),
            HttpFailure::Status(StatusCode::BAD_REQUEST, m) => PayrollError::InvalidAmount(m),
            HttpFailure::Status(status, m) => PayrollError::Transport(format!("{status}: {m}")),
            HttpFailure::Network(m) => PayrollError::Transport(m),
        }
    }

    fn into_encryption_error(self) -> PayrollError {
        match self {
            HttpFailure::Status(StatusCode::BAD_REQUEST, m) => PayrollError::InvalidAmount(m),
            HttpFailure::Status(StatusCode::UNAUTHORIZED, m) => PayrollError::Unauthorized(m),
            HttpFailure::Status(status, m) => {
                PayrollError::EncryptionServiceUnavailable(format!("{status}: {m}"))
            }
            HttpFailure::Network(m) => PayrollError::EncryptionServiceUnavailable(m),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DevnetClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl DevnetClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &PayrollConfig) -> Self {
        Self::new(config.devnet_url.clone(), config.api_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn network(&self) -> Result<NetworkInfo, PayrollError> {
        self.get(paths::NETWORK)
            .await
            .map_err(HttpFailure::into_ledger_error)?
            .ok_or_else(|| PayrollError::NotFound("network info".to_string()))
    }

    /// Credit a devnet account, as a local node's prefunded accounts would be.
    pub async fn fund(&self, address: Address, amount: Amount) -> Result<AccountBalance, PayrollError> {
        self.post(paths::FAUCET, &FaucetRequest { address, amount })
            .await
            .map_err(HttpFailure::into_ledger_error)
    }

    pub async fn balance(&self, address: Address) -> Result<Amount, PayrollError> {
        let account: Option<AccountBalance> = self
            .get(&paths::account(&address))
            .await
            .map_err(HttpFailure::into_ledger_error)?;
        Ok(account.map(|a| a.balance).unwrap_or(0))
    }

    /// `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, HttpFailure> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "devnet GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HttpFailure::Network(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(resp).await.map(Some)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, HttpFailure> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "devnet POST");
        let mut req = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| HttpFailure::Network(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, HttpFailure> {
        let status = resp.status();
        if !status.is_success() {
            // Unauthorized responses from the middleware carry no JSON body.
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("error").to_string());
            return Err(HttpFailure::Status(status, message));
        }
        resp.json::<T>()
            .await
            .map_err(|e| HttpFailure::Network(format!("malformed response: {e}")))
    }
}

impl LedgerProgram for DevnetClient {
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, PayrollError> {
        let submitted: TxSubmitted = self
            .post(paths::TRANSACTIONS, &TxSubmission { from, call })
            .await
            .map_err(HttpFailure::into_ledger_error)?;
        Ok(submitted.tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, PayrollError> {
        self.get(&paths::transaction(&tx_hash))
            .await
            .map_err(HttpFailure::into_ledger_error)
    }

    async fn company_info(&self, company: Address) -> Result<Option<CompanyInfo>, PayrollError> {
        self.get(&paths::company(&company))
            .await
            .map_err(HttpFailure::into_ledger_error)
    }

    async fn employee_info(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<EmployeeInfo>, PayrollError> {
        self.get(&paths::employee(&company, &employee))
            .await
            .map_err(HttpFailure::into_ledger_error)
    }

    async fn company_employees(&self, company: Address) -> Result<Vec<Address>, PayrollError> {
        let listing: Option<CompanyEmployees> = self
            .get(&paths::company_employees(&company))
            .await
            .map_err(HttpFailure::into_ledger_error)?;
        Ok(listing.map(|l| l.employees).unwrap_or_default())
    }

    async fn employee_salary(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<CiphertextHandle>, PayrollError> {
        let view: Option<EncryptedView> = self
            .get(&paths::employee_salary(&company, &employee))
            .await
            .map_err(HttpFailure::into_ledger_error)?;
        Ok(view.map(|v| v.handle))
    }

    async fn company_payroll(&self, company: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
        let view: Option<EncryptedView> = self
            .get(&paths::company_payroll(&company))
            .await
            .map_err(HttpFailure::into_ledger_error)?;
        Ok(view.map(|v| v.handle))
    }
}

impl EncryptionService for DevnetClient {
    async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptResponse, PayrollError> {
        self.post(paths::ENCRYPT, &request)
            .await
            .map_err(HttpFailure::into_encryption_error)
    }
}
