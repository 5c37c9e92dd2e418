//! The payroll flows.
//!
//! Each mutating operation runs linearly:
//! compute amounts -> capture session -> encrypt -> re-check session -> finalize ->
//! re-check session -> submit -> await confirmation -> update the cache.
//!
//! Suspension points are the wallet reads, the encryption round trip, the submission and the
//! confirmation wait. The cache lock is never held across any of them.

use crate::calculator::{compute_plan_with_rates, summarize, BonusRates, PayrollSummary};
use crate::config::{PaymentMode, PayrollConfig};
use crate::encryption::{EncryptedValueBuilder, EncryptionService};
use crate::errors::PayrollError;
use crate::ledger::{LedgerProgram, PayrollLedgerClient};
use crate::session::{ChainSessionGuard, Checkpoint, WalletSession};
use crate::state::{CompanyView, EmployeeView, PayrollState};
use crate::types::{
    Address, Amount, BitWidth, ChainId, Employee, LedgerEvent, PaymentPlan, TxReceipt,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Inputs of one billing cycle. The base salary is plaintext only until it is encrypted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryTerms {
    pub base_salary: Amount,
    pub kpi_score: u8,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub due_date: NaiveDate,
}

pub struct PayrollService<L, E, W> {
    client: PayrollLedgerClient<L>,
    encryption: E,
    wallet: W,
    chain_id: ChainId,
    payment_mode: PaymentMode,
    bonus_rates: BonusRates,
    state: Mutex<PayrollState>,
}

impl<L, E, W> PayrollService<L, E, W>
where
    L: LedgerProgram,
    E: EncryptionService,
    W: WalletSession,
{
    pub fn new(config: &PayrollConfig, ledger: L, encryption: E, wallet: W) -> Self {
        Self {
            client: PayrollLedgerClient::new(ledger, config.contract_address, config.confirmation_timeout),
            encryption,
            wallet,
            chain_id: config.chain_id,
            payment_mode: config.payment_mode,
            bonus_rates: config.bonus_rates,
            state: Mutex::new(PayrollState::new()),
        }
    }

    pub fn client(&self) -> &PayrollLedgerClient<L> {
        &self.client
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Copy of the current cache.
    pub fn snapshot(&self) -> PayrollState {
        self.state().clone()
    }

    pub fn plan(&self, company: &Address, employee: &Address) -> Option<PaymentPlan> {
        self.state().plan(company, employee).cloned()
    }

    pub fn summary(&self, company: &Address) -> PayrollSummary {
        let state = self.state();
        summarize(state.plans_of(company))
    }

    fn state(&self) -> MutexGuard<'_, PayrollState> {
        lock(&self.state)
    }

    fn claim_payment(&self, company: Address, employee: Address) -> Result<(PaymentClaim<'_>, PaymentPlan), PayrollError> {
        let plan = self.state().claim_payment(&company, &employee)?;
        let claim = PaymentClaim {
            state: &self.state,
            company,
            employee,
        };
        Ok((claim, plan))
    }

    /// Capture the session and make sure the wallet is on the program's network.
    async fn begin(&self) -> Result<ChainSessionGuard, PayrollError> {
        let guard = ChainSessionGuard::capture(&self.wallet).await?;
        if guard.chain_id() != self.chain_id {
            return Err(PayrollError::SessionStale {
                checkpoint: Checkpoint::Start,
                detail: format!(
                    "wallet is on chain {}, payroll program lives on chain {}",
                    guard.chain_id(),
                    self.chain_id
                ),
            });
        }
        Ok(guard)
    }

    /// Load the company header from the ledger when the cache has not seen it yet.
    async fn ensure_company_cached(&self, company: Address) -> Result<(), PayrollError> {
        if self.state().company(&company).is_some() {
            return Ok(());
        }
        let info = self
            .client
            .company_info(company)
            .await?
            .ok_or_else(|| PayrollError::NotFound(format!("company {company} is not registered")))?;
        self.state().apply_company_registered(company, info.name);
        Ok(())
    }

    pub async fn register_company(&self, name: &str) -> Result<TxReceipt, PayrollError> {
        let guard = self.begin().await?;
        let company = guard.signer();

        guard.ensure_consistent(&self.wallet, Checkpoint::BeforeSubmit).await?;
        let receipt = self.client.register_company(company, name).await?;

        self.state().apply_company_registered(company, name.to_string());
        info!(%company, name, tx_hash = %receipt.tx_hash, "company registered");
        Ok(receipt)
    }

    /// Encrypt base salary, KPI bonus and task bonus, then register the employee.
    pub async fn add_employee(&self, employee: Address, terms: SalaryTerms) -> Result<TxReceipt, PayrollError> {
        let plan = self.compute(employee, &terms)?;

        let guard = self.begin().await?;
        let company = guard.signer();
        self.ensure_company_cached(company).await?;

        let mut builder = EncryptedValueBuilder::begin(self.client.contract(), company);
        builder
            .add_value(BitWidth::U64, plan.base_amount as i128)?
            .add_value(BitWidth::U64, plan.kpi_bonus as i128)?
            .add_value(BitWidth::U64, plan.task_bonus as i128)?;

        guard.ensure_consistent(&self.wallet, Checkpoint::BeforeFinalize).await?;
        let input = builder.finalize(&self.encryption).await?;
        let base_handle = input.handles.first().copied();

        guard.ensure_consistent(&self.wallet, Checkpoint::BeforeSubmit).await?;
        let receipt = self.client.add_employee(company, employee, input).await?;

        let record = Employee {
            address: employee,
            company_address: company,
            base_salary: base_handle,
            kpi_score: terms.kpi_score,
            tasks_completed: terms.tasks_completed,
            total_tasks: terms.total_tasks,
            is_active: true,
            last_payment_date: None,
        };
        let total = plan.total_amount;
        self.state().apply_employee_added(record, plan)?;
        info!(%company, %employee, total, tx_hash = %receipt.tx_hash, "employee added");
        Ok(receipt)
    }

    pub fn approve_payment(&self, company: &Address, employee: &Address) -> Result<(), PayrollError> {
        self.state().approve(company, employee)
    }

    /// Settle the employee's open plan.
    ///
    /// A plan that is already paid fails with `AlreadyPaid`, and one with a payment already in
    /// flight from this service fails with `PaymentInProgress`, both before any wallet,
    /// encryption or ledger call.
    pub async fn pay_salary(&self, company: Address, employee: Address) -> Result<TxReceipt, PayrollError> {
        let (_claim, plan) = self.claim_payment(company, employee)?;
        let total = plan.total_amount;

        if self.payment_mode == PaymentMode::StoredSalary {
            let stored = self.state().stored_total(&company, &employee);
            if stored != Some(total) {
                return Err(PayrollError::InvalidAmount(format!(
                    "plan total {total} differs from the stored salary terms ({}); pay an encrypted amount instead",
                    stored.map_or_else(|| "unknown".to_string(), |t| t.to_string())
                )));
            }
        }

        let guard = self.begin().await?;
        if guard.signer() != company {
            return Err(PayrollError::Unauthorized(format!(
                "signer {} does not own company {company}",
                guard.signer()
            )));
        }

        let amount = match self.payment_mode {
            PaymentMode::EncryptedAmount => {
                let mut builder = EncryptedValueBuilder::begin(self.client.contract(), company);
                builder.add_value(BitWidth::U64, total as i128)?;
                guard.ensure_consistent(&self.wallet, Checkpoint::BeforeFinalize).await?;
                Some(builder.finalize(&self.encryption).await?)
            }
            PaymentMode::StoredSalary => None,
        };

        guard.ensure_consistent(&self.wallet, Checkpoint::BeforeSubmit).await?;
        let receipt = self
            .client
            .pay_salary(company, employee, plan.due_date, amount)
            .await?;

        let settled_at = settlement_time(&receipt);
        let applied = self.state().apply_salary_paid(&company, &employee, settled_at);
        match applied {
            Ok(()) => {}
            Err(PayrollError::AlreadyPaid(_)) => {
                warn!(%company, %employee, "payment confirmed for a plan already marked paid");
            }
            Err(e) => return Err(e),
        }
        info!(%company, %employee, %settled_at, tx_hash = %receipt.tx_hash, "salary paid");
        Ok(receipt)
    }

    pub async fn deactivate_employee(&self, employee: Address) -> Result<TxReceipt, PayrollError> {
        let guard = self.begin().await?;
        let company = guard.signer();

        guard.ensure_consistent(&self.wallet, Checkpoint::BeforeSubmit).await?;
        let receipt = self.client.deactivate_employee(company, employee).await?;

        let mut state = self.state();
        if state.employee(&company, &employee).is_some() {
            state.apply_employee_deactivated(&company, &employee)?;
        }
        info!(%company, %employee, tx_hash = %receipt.tx_hash, "employee deactivated");
        Ok(receipt)
    }

    /// Open the next billing cycle for an employee whose current plan is paid.
    pub fn schedule_next_cycle(
        &self,
        company: &Address,
        employee: &Address,
        terms: SalaryTerms,
    ) -> Result<PaymentPlan, PayrollError> {
        let plan = self.compute(*employee, &terms)?;
        self.state().schedule_next_cycle(company, employee, plan.clone())?;
        Ok(plan)
    }

    /// Rebuild the company's cache entries from read views.
    ///
    /// Returns employees whose open plans turned out to be settled on the ledger.
    pub async fn refresh_company(&self, company: Address) -> Result<Vec<Address>, PayrollError> {
        let info = self
            .client
            .company_info(company)
            .await?
            .ok_or_else(|| PayrollError::NotFound(format!("company {company} is not registered")))?;

        let total_payroll = self.client.company_payroll(company).await?;

        let mut employees = Vec::new();
        for address in self.client.company_employees(company).await? {
            if let Some(info) = self.client.employee_info(company, address).await? {
                let base_salary = self.client.employee_salary(company, address).await?;
                employees.push(EmployeeView { info, base_salary });
            }
        }

        let view = CompanyView { info, total_payroll, employees };
        let settled = self.state().reconcile_company(company, view);
        if !settled.is_empty() {
            info!(%company, settled = settled.len(), "reconciled payments found on ledger");
        }
        Ok(settled)
    }

    fn compute(&self, employee: Address, terms: &SalaryTerms) -> Result<PaymentPlan, PayrollError> {
        compute_plan_with_rates(
            &self.bonus_rates,
            employee,
            terms.base_salary,
            terms.kpi_score,
            terms.tasks_completed,
            terms.total_tasks,
            terms.due_date,
        )
    }
}

fn lock(state: &Mutex<PayrollState>) -> MutexGuard<'_, PayrollState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a plan's in-flight mark for the length of one payment flow.
struct PaymentClaim<'a> {
    state: &'a Mutex<PayrollState>,
    company: Address,
    employee: Address,
}

impl Drop for PaymentClaim<'_> {
    fn drop(&mut self) {
        lock(self.state).release_payment(&self.company, &self.employee);
    }
}

/// Timestamp of the `SalaryPaid` event, falling back to the block timestamp.
fn settlement_time(receipt: &TxReceipt) -> DateTime<Utc> {
    receipt
        .events
        .iter()
        .find_map(|e| match e {
            LedgerEvent::SalaryPaid { timestamp, .. } => Some(*timestamp),
            _ => None,
        })
        .unwrap_or(receipt.timestamp)
}
