//! The payroll program as the devnet runs it.
//!
//! A call executes inside one sqlite transaction. A revert rolls every write back, including
//! proof consumption, and is still recorded as a receipt.

use crate::db;
use crate::errors::{internal, ApiError};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use payroll_core::constants::revert;
use payroll_core::types::{
    Address, BitWidth, CiphertextHandle, InputProof, LedgerCall, LedgerEvent, TxHash, TxReceipt,
    TxStatus, TxSubmission,
};
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a call did not apply.
#[derive(Debug)]
pub enum Failure {
    /// Rejected by a program rule; ends up on the receipt.
    Revert(String),
    /// Storage failure; the request itself fails.
    Fault(ApiError),
}

impl From<ApiError> for Failure {
    fn from(e: ApiError) -> Self {
        Failure::Fault(e)
    }
}

macro_rules! require {
    ($cond:expr, $reason:expr) => {
        if !$cond {
            return Err(Failure::Revert($reason.to_string()));
        }
    };
}

/// Run one call from `from` against the program state reachable through `conn`.
pub async fn execute(
    conn: &mut SqliteConnection,
    contract: &Address,
    from: &Address,
    call: &LedgerCall,
    at: DateTime<Utc>,
) -> Result<Vec<LedgerEvent>, Failure> {
    match call {
        LedgerCall::RegisterCompany { name } => {
            require!(!name.trim().is_empty(), "company name required");
            require!(db::company(&mut *conn, from).await?.is_none(), revert::COMPANY_EXISTS);

            let payroll = seal(conn, 0).await?;
            db::insert_company(&mut *conn, from, name, &payroll, at).await?;
            Ok(vec![LedgerEvent::CompanyRegistered {
                company: *from,
                name: name.clone(),
            }])
        }

        LedgerCall::AddEmployee {
            employee,
            enc_base_salary,
            enc_kpi_bonus,
            enc_task_bonus,
            proof,
        } => {
            require!(db::company(&mut *conn, from).await?.is_some(), revert::COMPANY_NOT_FOUND);
            require!(
                db::employee(&mut *conn, from, employee).await?.is_none(),
                revert::EMPLOYEE_EXISTS
            );

            let handles = [*enc_base_salary, *enc_kpi_bonus, *enc_task_bonus];
            admit_proof(conn, contract, from, proof, &handles).await?;

            let stored = stored_total(conn, &handles).await?;
            adjust_payroll(conn, from, stored, 0).await?;
            db::insert_employee(&mut *conn, from, employee, &handles).await?;
            Ok(vec![LedgerEvent::EmployeeAdded {
                company: *from,
                employee: *employee,
            }])
        }

        LedgerCall::PaySalary { employee, period, amount } => {
            require!(db::company(&mut *conn, from).await?.is_some(), revert::COMPANY_NOT_FOUND);
            let Some(record) = db::employee(&mut *conn, from, employee).await? else {
                return Err(Failure::Revert(revert::EMPLOYEE_NOT_FOUND.to_string()));
            };
            require!(record.is_active, revert::EMPLOYEE_INACTIVE);
            require!(
                record.paid_period.is_none_or(|paid| *period > paid),
                revert::PERIOD_ALREADY_PAID
            );

            let value = match amount {
                Some(enc) => {
                    admit_proof(conn, contract, from, &enc.proof, &[enc.handle]).await?;
                    value_of(conn, &enc.handle).await?
                }
                None => stored_total(conn, &record.handles).await?,
            };

            let balance = db::balance(&mut *conn, from).await?;
            require!(
                balance >= value,
                format!("{}: have {balance}, need {value}", revert::INSUFFICIENT_BALANCE)
            );
            db::set_balance(&mut *conn, from, balance - value).await?;

            // Read after the debit so a company paying itself nets out.
            let payee = db::balance(&mut *conn, employee).await?;
            let Some(credited) = payee.checked_add(value) else {
                return Err(Failure::Revert("payee balance overflow".to_string()));
            };
            db::set_balance(&mut *conn, employee, credited).await?;
            db::set_last_payment(&mut *conn, from, employee, *period, at).await?;

            Ok(vec![LedgerEvent::SalaryPaid {
                company: *from,
                employee: *employee,
                timestamp: at,
            }])
        }

        LedgerCall::DeactivateEmployee { employee } => {
            let Some(record) = db::employee(&mut *conn, from, employee).await? else {
                return Err(Failure::Revert(revert::EMPLOYEE_NOT_FOUND.to_string()));
            };

            if record.is_active {
                let stored = stored_total(conn, &record.handles).await?;
                adjust_payroll(conn, from, 0, stored).await?;
            }
            db::deactivate_employee(&mut *conn, from, employee).await?;
            Ok(vec![LedgerEvent::EmployeeDeactivated {
                company: *from,
                employee: *employee,
            }])
        }
    }
}

/// Check that `proof` was issued for this contract, this sender and exactly these handles, then
/// mark it used.
async fn admit_proof(
    conn: &mut SqliteConnection,
    contract: &Address,
    from: &Address,
    proof: &InputProof,
    handles: &[CiphertextHandle],
) -> Result<(), Failure> {
    let Some(row) = db::proof(&mut *conn, proof).await? else {
        return Err(Failure::Revert(revert::INVALID_PROOF.to_string()));
    };
    require!(!row.consumed, revert::PROOF_CONSUMED);
    require!(
        row.contract == *contract && row.submitter == *from && row.handles == handles,
        revert::INVALID_PROOF
    );

    db::consume_proof(&mut *conn, proof).await?;
    Ok(())
}

async fn value_of(conn: &mut SqliteConnection, handle: &CiphertextHandle) -> Result<u64, Failure> {
    match db::ciphertext_value(&mut *conn, handle).await? {
        Some(value) => Ok(value),
        None => Err(Failure::Revert(format!("unknown ciphertext {handle}"))),
    }
}

/// Base salary plus both bonuses as encrypted at `addEmployee`.
async fn stored_total(conn: &mut SqliteConnection, handles: &[CiphertextHandle; 3]) -> Result<u64, Failure> {
    let mut total: u64 = 0;
    for handle in handles {
        let value = value_of(conn, handle).await?;
        let Some(sum) = total.checked_add(value) else {
            return Err(Failure::Revert("stored salary overflow".to_string()));
        };
        total = sum;
    }
    Ok(total)
}

/// Store `value` under a fresh handle, as the coprocessor would for a computed ciphertext.
async fn seal(conn: &mut SqliteConnection, value: u64) -> Result<CiphertextHandle, Failure> {
    let handle = CiphertextHandle(rand::random());
    db::insert_ciphertext(&mut *conn, &handle, BitWidth::U64, value).await?;
    Ok(handle)
}

/// Replace the company's encrypted payroll total with `total + add - sub`.
async fn adjust_payroll(conn: &mut SqliteConnection, company: &Address, add: u64, sub: u64) -> Result<(), Failure> {
    let Some(row) = db::company(&mut *conn, company).await? else {
        return Err(Failure::Revert(revert::COMPANY_NOT_FOUND.to_string()));
    };
    let current = value_of(conn, &row.payroll_handle).await?;
    let total = current.saturating_add(add).saturating_sub(sub);
    let handle = seal(conn, total).await?;
    db::set_company_payroll(&mut *conn, company, &handle).await?;
    Ok(())
}

/// Mine one transaction: execute it in its own block and store the receipt, reverted or not.
pub async fn mine(state: &AppState, submission: TxSubmission) -> Result<TxReceipt, ApiError> {
    let TxSubmission { from, call } = submission;
    let method = call.method();
    let request_id = Uuid::new_v4();

    let _writer = state.writer.lock().await;

    let block_number = db::next_block_number(&state.db).await?;
    let tx_hash = TxHash(rand::random());
    let at = Utc::now();

    let mut tx = state.db.begin().await.map_err(internal)?;
    let outcome = execute(&mut tx, &state.network.contract, &from, &call, at).await;

    let receipt = match outcome {
        Ok(events) => {
            tx.commit().await.map_err(internal)?;
            info!(%request_id, method, %from, %tx_hash, block_number, "transaction applied");
            TxReceipt {
                tx_hash,
                block_number,
                timestamp: at,
                status: TxStatus::Success,
                revert_reason: None,
                events,
            }
        }
        Err(Failure::Revert(reason)) => {
            tx.rollback().await.map_err(internal)?;
            warn!(%request_id, method, %from, %tx_hash, %reason, "transaction reverted");
            TxReceipt {
                tx_hash,
                block_number,
                timestamp: at,
                status: TxStatus::Reverted,
                revert_reason: Some(reason),
                events: Vec::new(),
            }
        }
        Err(Failure::Fault(e)) => {
            tx.rollback().await.map_err(internal)?;
            return Err(e);
        }
    };

    db::insert_transaction(&state.db, &receipt, &from, method).await?;
    Ok(receipt)
}
