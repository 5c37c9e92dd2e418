//! Chain-session consistency.
//!
//! The active network and signing account belong to the user's wallet and can change at any
//! moment. An operation captures them once when it starts and re-checks them at fixed
//! checkpoints; a mismatch aborts the operation before anything is submitted.

use crate::errors::PayrollError;
use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;
use tracing::warn;

/// Environment surface of the wallet collaborator.
#[allow(async_fn_in_trait)]
pub trait WalletSession {
    async fn current_chain_id(&self) -> Result<ChainId, PayrollError>;

    async fn current_signer(&self) -> Result<Address, PayrollError>;

    /// Ask the wallet to expose its accounts; the first one is the active signer.
    async fn request_access(&self) -> Result<Vec<Address>, PayrollError>;
}

/// Network + signer pairing at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSession {
    pub chain_id: ChainId,
    pub signer: Address,
}

/// Where in an operation the session was re-validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Checkpoint {
    /// The wallet is compared with the configured network when the operation opens.
    Start,
    BeforeFinalize,
    BeforeSubmit,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Start => f.write_str("at start"),
            Checkpoint::BeforeFinalize => f.write_str("before finalize"),
            Checkpoint::BeforeSubmit => f.write_str("before submit"),
        }
    }
}

/// Snapshot of the session taken when an operation begins.
#[derive(Clone, Copy, Debug)]
pub struct ChainSessionGuard {
    expected: ChainSession,
}

impl ChainSessionGuard {
    pub fn new(expected: ChainSession) -> Self {
        Self { expected }
    }

    /// Read the wallet once and pin what it reports.
    pub async fn capture<W: WalletSession>(wallet: &W) -> Result<Self, PayrollError> {
        let chain_id = wallet.current_chain_id().await?;
        let signer = wallet.current_signer().await?;
        Ok(Self::new(ChainSession { chain_id, signer }))
    }

    pub fn expected(&self) -> ChainSession {
        self.expected
    }

    pub fn chain_id(&self) -> ChainId {
        self.expected.chain_id
    }

    pub fn signer(&self) -> Address {
        self.expected.signer
    }

    pub fn is_consistent(&self, current_chain_id: ChainId, current_signer: Address) -> bool {
        self.expected.chain_id == current_chain_id && self.expected.signer == current_signer
    }

    /// Re-read the wallet and fail with `SessionStale` if either value moved.
    pub async fn ensure_consistent<W: WalletSession>(
        &self,
        wallet: &W,
        checkpoint: Checkpoint,
    ) -> Result<(), PayrollError> {
        let chain_id = wallet.current_chain_id().await?;
        let signer = wallet.current_signer().await?;
        if self.is_consistent(chain_id, signer) {
            return Ok(());
        }

        let detail = format!(
            "expected chain {} / signer {}, found chain {} / signer {}",
            self.expected.chain_id, self.expected.signer, chain_id, signer
        );
        warn!(%checkpoint, %detail, "stale chain session");
        Err(PayrollError::SessionStale { checkpoint, detail })
    }
}

/// In-process wallet: a fixed account list on one network, switchable at runtime.
#[derive(Debug)]
pub struct DevWallet {
    accounts: Vec<Address>,
    session: RwLock<ChainSession>,
}

impl DevWallet {
    /// The first account is selected. `accounts` must not be empty.
    pub fn new(chain_id: ChainId, accounts: Vec<Address>) -> Result<Self, PayrollError> {
        let signer = *accounts
            .first()
            .ok_or_else(|| PayrollError::Config("dev wallet needs at least one account".to_string()))?;
        Ok(Self {
            accounts,
            session: RwLock::new(ChainSession { chain_id, signer }),
        })
    }

    fn snapshot(&self) -> Result<ChainSession, PayrollError> {
        self.session
            .read()
            .map(|s| *s)
            .map_err(|_| PayrollError::Transport("wallet state poisoned".to_string()))
    }

    pub fn switch_chain(&self, chain_id: ChainId) -> Result<(), PayrollError> {
        let mut s = self
            .session
            .write()
            .map_err(|_| PayrollError::Transport("wallet state poisoned".to_string()))?;
        s.chain_id = chain_id;
        Ok(())
    }

    pub fn switch_account(&self, signer: Address) -> Result<(), PayrollError> {
        if !self.accounts.contains(&signer) {
            return Err(PayrollError::Unauthorized(format!("{signer} is not a wallet account")));
        }
        let mut s = self
            .session
            .write()
            .map_err(|_| PayrollError::Transport("wallet state poisoned".to_string()))?;
        s.signer = signer;
        Ok(())
    }
}

impl WalletSession for DevWallet {
    async fn current_chain_id(&self) -> Result<ChainId, PayrollError> {
        Ok(self.snapshot()?.chain_id)
    }

    async fn current_signer(&self) -> Result<Address, PayrollError> {
        Ok(self.snapshot()?.signer)
    }

    async fn request_access(&self) -> Result<Vec<Address>, PayrollError> {
        let signer = self.snapshot()?.signer;
        let mut out = vec![signer];
        out.extend(self.accounts.iter().copied().filter(|a| *a != signer));
        Ok(out)
    }
}
