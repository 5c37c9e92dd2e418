//! Typed access to the payroll program.
//!
//! Mutating calls are submitted once and then awaited for exactly one confirmation. Submission
//! and confirmation share one deadline. Nothing here resubmits: a revert or a timeout goes straight back to the
//! caller, which decides what to do with fresh ledger state.

use crate::constants::{revert, ADD_EMPLOYEE_HANDLES, RECEIPT_POLL_INTERVAL};
use crate::encryption::EncryptedInput;
use crate::errors::PayrollError;
use crate::types::{
    Address, CiphertextHandle, CompanyInfo, EmployeeInfo, LedgerCall, TxHash, TxReceipt, TxStatus,
};
use chrono::NaiveDate;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Raw transport to a node hosting the payroll program.
#[allow(async_fn_in_trait)]
pub trait LedgerProgram {
    /// Relay one call signed by `from`. Returns as soon as the node accepted it.
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, PayrollError>;

    /// `Ok(None)` while the transaction is unconfirmed.
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, PayrollError>;

    async fn company_info(&self, company: Address) -> Result<Option<CompanyInfo>, PayrollError>;

    async fn employee_info(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<EmployeeInfo>, PayrollError>;

    async fn company_employees(&self, company: Address) -> Result<Vec<Address>, PayrollError>;

    /// Handle of the employee's stored base salary.
    async fn employee_salary(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<CiphertextHandle>, PayrollError>;

    /// Handle of the company's encrypted payroll total.
    async fn company_payroll(&self, company: Address) -> Result<Option<CiphertextHandle>, PayrollError>;
}

/// Map a revert reason onto the error taxonomy.
pub fn classify_revert(reason: &str) -> PayrollError {
    if reason.contains(revert::INSUFFICIENT_BALANCE) {
        PayrollError::InsufficientBalance(reason.to_string())
    } else {
        PayrollError::TransactionReverted(reason.to_string())
    }
}

pub struct PayrollLedgerClient<L> {
    ledger: L,
    contract: Address,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl<L: LedgerProgram> PayrollLedgerClient<L> {
    pub fn new(ledger: L, contract: Address, confirmation_timeout: Duration) -> Self {
        Self {
            ledger,
            contract,
            confirmation_timeout,
            poll_interval: RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn register_company(&self, from: Address, name: &str) -> Result<TxReceipt, PayrollError> {
        self.execute(from, LedgerCall::RegisterCompany { name: name.to_string() })
            .await
    }

    /// `input` must hold base salary, KPI bonus and task bonus handles, in that order.
    pub async fn add_employee(
        &self,
        from: Address,
        employee: Address,
        input: EncryptedInput,
    ) -> Result<TxReceipt, PayrollError> {
        self.check_binding(&input, from)?;
        let got = input.handles.len();
        let [enc_base_salary, enc_kpi_bonus, enc_task_bonus]: [_; ADD_EMPLOYEE_HANDLES] =
            input.handles.try_into().map_err(|_| {
                PayrollError::InvalidAmount(format!(
                    "addEmployee takes {ADD_EMPLOYEE_HANDLES} encrypted values, got {got}"
                ))
            })?;

        self.execute(
            from,
            LedgerCall::AddEmployee {
                employee,
                enc_base_salary,
                enc_kpi_bonus,
                enc_task_bonus,
                proof: input.proof,
            },
        )
        .await
    }

    /// Settle `period` for `employee`. A period the program has already paid comes back as
    /// `AlreadyPaid`.
    pub async fn pay_salary(
        &self,
        from: Address,
        employee: Address,
        period: NaiveDate,
        amount: Option<EncryptedInput>,
    ) -> Result<TxReceipt, PayrollError> {
        let amount = match amount {
            Some(input) => {
                self.check_binding(&input, from)?;
                Some(input.into_amount()?)
            }
            None => None,
        };
        self.execute(from, LedgerCall::PaySalary { employee, period, amount })
            .await
            .map_err(|e| match e {
                PayrollError::TransactionReverted(reason) if reason.contains(revert::PERIOD_ALREADY_PAID) => {
                    PayrollError::AlreadyPaid(employee)
                }
                other => other,
            })
    }

    pub async fn deactivate_employee(&self, from: Address, employee: Address) -> Result<TxReceipt, PayrollError> {
        self.execute(from, LedgerCall::DeactivateEmployee { employee })
            .await
    }

    pub async fn company_info(&self, company: Address) -> Result<Option<CompanyInfo>, PayrollError> {
        self.ledger.company_info(company).await
    }

    pub async fn employee_info(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<EmployeeInfo>, PayrollError> {
        self.ledger.employee_info(company, employee).await
    }

    pub async fn company_employees(&self, company: Address) -> Result<Vec<Address>, PayrollError> {
        self.ledger.company_employees(company).await
    }

    pub async fn employee_salary(
        &self,
        company: Address,
        employee: Address,
    ) -> Result<Option<CiphertextHandle>, PayrollError> {
        self.ledger.employee_salary(company, employee).await
    }

    pub async fn company_payroll(&self, company: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
        self.ledger.company_payroll(company).await
    }

    fn check_binding(&self, input: &EncryptedInput, from: Address) -> Result<(), PayrollError> {
        if input.is_bound_to(&self.contract, &from) {
            return Ok(());
        }
        Err(PayrollError::InvalidAmount(format!(
            "proof bound to contract {} / submitter {}, call targets {} from {from}",
            input.contract, input.submitter, self.contract
        )))
    }

    async fn execute(&self, from: Address, call: LedgerCall) -> Result<TxReceipt, PayrollError> {
        let method = call.method();
        let deadline = Instant::now() + self.confirmation_timeout;

        let tx_hash = match tokio::time::timeout_at(deadline, self.ledger.submit(from, call)).await {
            Ok(submitted) => submitted?,
            Err(_) => {
                warn!(method, %from, timeout = ?self.confirmation_timeout, "submission timed out");
                return Err(PayrollError::NetworkTimeout {
                    tx_hash: None,
                    waited: self.confirmation_timeout,
                });
            }
        };
        info!(method, %from, %tx_hash, "transaction submitted");

        let receipt = match tokio::time::timeout_at(deadline, self.wait_for_receipt(tx_hash)).await {
            Ok(receipt) => receipt?,
            Err(_) => {
                warn!(method, %tx_hash, timeout = ?self.confirmation_timeout, "confirmation timed out");
                return Err(PayrollError::NetworkTimeout {
                    tx_hash: Some(tx_hash),
                    waited: self.confirmation_timeout,
                });
            }
        };

        match receipt.status {
            TxStatus::Success => {
                info!(method, %tx_hash, block = receipt.block_number, "transaction confirmed");
                Ok(receipt)
            }
            TxStatus::Reverted => {
                let reason = receipt.revert_reason.as_deref().unwrap_or("reverted without reason");
                warn!(method, %tx_hash, reason, "transaction reverted");
                Err(classify_revert(reason))
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, PayrollError> {
        loop {
            if let Some(receipt) = self.ledger.receipt(tx_hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::types::InputProof;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Accepts everything; the receipt outcome is scripted.
    struct Scripted {
        outcome: Option<(TxStatus, Option<&'static str>)>,
        /// The node never answers the submission.
        stalled: bool,
        submitted: Mutex<Vec<LedgerCall>>,
    }

    impl Scripted {
        fn new(outcome: Option<(TxStatus, Option<&'static str>)>) -> Self {
            Self { outcome, stalled: false, submitted: Mutex::new(Vec::new()) }
        }
    }

    impl LedgerProgram for Scripted {
        async fn submit(&self, _from: Address, call: LedgerCall) -> Result<TxHash, PayrollError> {
            self.submitted.lock().unwrap().push(call);
            if self.stalled {
                std::future::pending::<()>().await;
            }
            Ok(TxHash([9u8; 32]))
        }

        async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, PayrollError> {
            Ok(self.outcome.map(|(status, reason)| TxReceipt {
                tx_hash,
                block_number: 1,
                timestamp: Utc::now(),
                status,
                revert_reason: reason.map(str::to_string),
                events: Vec::new(),
            }))
        }

        async fn company_info(&self, _company: Address) -> Result<Option<CompanyInfo>, PayrollError> {
            Ok(None)
        }

        async fn employee_info(&self, _c: Address, _e: Address) -> Result<Option<EmployeeInfo>, PayrollError> {
            Ok(None)
        }

        async fn company_employees(&self, _company: Address) -> Result<Vec<Address>, PayrollError> {
            Ok(Vec::new())
        }

        async fn employee_salary(&self, _c: Address, _e: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
            Ok(None)
        }

        async fn company_payroll(&self, _company: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
            Ok(None)
        }
    }

    const CONTRACT: Address = Address([0xc0; 20]);
    const FROM: Address = Address([0x01; 20]);

    fn client(outcome: Option<(TxStatus, Option<&'static str>)>) -> PayrollLedgerClient<Scripted> {
        PayrollLedgerClient::new(Scripted::new(outcome), CONTRACT, Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn period() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn input(n: usize, submitter: Address) -> EncryptedInput {
        EncryptedInput {
            contract: CONTRACT,
            submitter,
            handles: (0..n).map(|i| CiphertextHandle([i as u8; 32])).collect(),
            proof: InputProof(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn confirmed_receipt_is_returned() {
        let c = client(Some((TxStatus::Success, None)));
        let receipt = c.register_company(FROM, "Acme").await.unwrap();
        assert_eq!(receipt.tx_hash, TxHash([9u8; 32]));
    }

    #[tokio::test]
    async fn revert_reasons_are_classified() {
        let c = client(Some((TxStatus::Reverted, Some("employee inactive"))));
        let err = c.pay_salary(FROM, Address([2u8; 20]), period(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionReverted);
        assert_eq!(err.to_string(), "transaction reverted: employee inactive");

        let c = client(Some((TxStatus::Reverted, Some("insufficient balance: have 1, need 9"))));
        let err = c.pay_salary(FROM, Address([2u8; 20]), period(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    }

    #[tokio::test]
    async fn period_paid_elsewhere_is_already_paid() {
        let c = client(Some((TxStatus::Reverted, Some(revert::PERIOD_ALREADY_PAID))));
        let err = c.pay_salary(FROM, Address([2u8; 20]), period(), None).await.unwrap_err();
        assert!(matches!(err, PayrollError::AlreadyPaid(e) if e == Address([2u8; 20])), "{err:?}");

        // Other calls keep the plain revert.
        let err = c.deactivate_employee(FROM, Address([2u8; 20])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionReverted);
    }

    #[tokio::test]
    async fn stalled_submission_times_out_without_hash() {
        let mut ledger = Scripted::new(Some((TxStatus::Success, None)));
        ledger.stalled = true;
        let c = PayrollLedgerClient::new(ledger, CONTRACT, Duration::from_millis(50));

        let err = c.register_company(FROM, "Acme").await.unwrap_err();
        assert!(matches!(err, PayrollError::NetworkTimeout { tx_hash: None, .. }), "{err:?}");
        assert!(err.is_ambiguous());
        assert_eq!(c.ledger().submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_confirmation_times_out_with_hash() {
        let c = client(None);
        let err = c.deactivate_employee(FROM, Address([2u8; 20])).await.unwrap_err();
        match err {
            PayrollError::NetworkTimeout { tx_hash, .. } => assert_eq!(tx_hash, Some(TxHash([9u8; 32]))),
            other => panic!("unexpected {other:?}"),
        }
        // Submitted exactly once, never resubmitted.
        assert_eq!(c.ledger().submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_employee_keeps_handle_order() {
        let c = client(Some((TxStatus::Success, None)));
        c.add_employee(FROM, Address([2u8; 20]), input(3, FROM)).await.unwrap();

        let submitted = c.ledger().submitted.lock().unwrap();
        match &submitted[0] {
            LedgerCall::AddEmployee { enc_base_salary, enc_kpi_bonus, enc_task_bonus, .. } => {
                assert_eq!(enc_base_salary.0[0], 0);
                assert_eq!(enc_kpi_bonus.0[0], 1);
                assert_eq!(enc_task_bonus.0[0], 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_inputs_are_rejected_before_submission() {
        let c = client(Some((TxStatus::Success, None)));

        let err = c.add_employee(FROM, Address([2u8; 20]), input(2, FROM)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);

        let foreign = input(1, Address([0x77; 20]));
        let err = c.pay_salary(FROM, Address([2u8; 20]), period(), Some(foreign)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);

        assert!(c.ledger().submitted.lock().unwrap().is_empty());
    }
}
