//! Crate-wide constants shared by the calculator, the ledger client and the devnet.

use std::time::Duration;

/// Denominator for rates expressed in basis points.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Upper bound of the KPI score scale (a percentage).
pub const MAX_KPI_SCORE: u8 = 100;

/// KPI bonus rate in basis points (10%).
///
/// Applied as `kpi_score / 100 * rate * base_salary`, so a perfect score adds 10% of base.
pub const KPI_BONUS_RATE_BPS: u32 = 1_000;

/// Task bonus rate in basis points (2.5%).
///
/// Applied as `tasks_completed / total_tasks * rate * base_salary`.
/// With 18 of 20 tasks on a base of 8000 this yields 180.
pub const TASK_BONUS_RATE_BPS: u32 = 250;

/// Number of encrypted values `addEmployee` expects, in parameter order:
/// base salary, KPI bonus, task bonus.
pub const ADD_EMPLOYEE_HANDLES: usize = 3;

/// Default bound on waiting for one transaction confirmation.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between receipt polls while waiting for a confirmation.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Local Hardhat-style node.
pub const HARDHAT_CHAIN_ID: u64 = 31_337;

/// Public testnet the payroll program is deployed to.
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

/// Default payroll program address on a fresh local node (first deployment slot).
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// Default devnet endpoint.
pub const DEFAULT_DEVNET_URL: &str = "http://127.0.0.1:8545";

/// Revert reasons emitted by the payroll program.
///
/// The client classifies receipts by these strings, so both sides must agree.
pub mod revert {
    pub const COMPANY_EXISTS: &str = "company already registered";
    pub const COMPANY_NOT_FOUND: &str = "company not registered";
    pub const EMPLOYEE_EXISTS: &str = "employee already exists";
    pub const EMPLOYEE_NOT_FOUND: &str = "employee not found";
    pub const EMPLOYEE_INACTIVE: &str = "employee inactive";
    pub const PERIOD_ALREADY_PAID: &str = "salary already paid for this period";
    pub const INSUFFICIENT_BALANCE: &str = "insufficient balance";
    pub const INVALID_PROOF: &str = "invalid input proof";
    pub const PROOF_CONSUMED: &str = "input proof already used";
}
