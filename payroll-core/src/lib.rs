//! Client-side core of the confidential payroll protocol.
//!
//! This crate contains:
//! - The payroll data model and the payment-plan state machine.
//! - The bonus calculator (integer minor units, round-half-up).
//! - The encrypted-input builder that turns plaintext amounts into ciphertext handles + proof.
//! - The chain-session guard that detects wallet network/account switches mid-operation.
//! - A typed ledger client and the service that sequences all of the above.
//! - An HTTP adapter for the local devnet (`payroll-devnet`).

pub mod calculator;
pub mod config;
pub mod constants;
pub mod devnet;
pub mod encryption;
pub mod errors;
pub mod ledger;
pub mod payroll;
pub mod session;
pub mod state;
pub mod types;

pub use crate::errors::{ErrorKind, PayrollError};
pub use crate::payroll::{PayrollService, SalaryTerms};

pub type Result<T, E = PayrollError> = std::result::Result<T, E>;
