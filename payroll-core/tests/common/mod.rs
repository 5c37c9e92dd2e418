#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use payroll_core::config::{PaymentMode, PayrollConfig};
use payroll_core::constants::revert;
use payroll_core::encryption::EncryptionService;
use payroll_core::ledger::LedgerProgram;
use payroll_core::session::{DevWallet, WalletSession};
use payroll_core::types::{
    Address, ChainId, CiphertextHandle, CompanyInfo, EmployeeInfo, EncryptRequest, EncryptResponse,
    InputProof, LedgerCall, LedgerEvent, TxHash, TxReceipt, TxStatus,
};
use payroll_core::{PayrollError, PayrollService, SalaryTerms};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHAIN: ChainId = 31_337;
pub const CONTRACT: Address = Address([0xc0; 20]);
pub const COMPANY: Address = Address([0x01; 20]);
pub const OUTSIDER: Address = Address([0x02; 20]);
pub const ALICE: Address = Address([0xa1; 20]);
pub const BOB: Address = Address([0xb0; 20]);

struct EmployeeRecord {
    /// Base salary, KPI bonus, task bonus.
    handles: [CiphertextHandle; 3],
    active: bool,
    last_paid: Option<DateTime<Utc>>,
    paid_period: Option<NaiveDate>,
}

struct CompanyRecord {
    name: String,
    payroll: CiphertextHandle,
}

struct ProofBinding {
    contract: Address,
    submitter: Address,
    handles: Vec<CiphertextHandle>,
}

#[derive(Default)]
struct Chain {
    plaintexts: HashMap<CiphertextHandle, u64>,
    proofs: HashMap<Vec<u8>, ProofBinding>,
    consumed: HashSet<Vec<u8>>,
    companies: HashMap<Address, CompanyRecord>,
    employees: BTreeMap<(Address, Address), EmployeeRecord>,
    balances: HashMap<Address, u64>,
    receipts: HashMap<TxHash, TxReceipt>,
    withheld: HashMap<TxHash, TxReceipt>,
    counter: u64,
    block: u64,
}

impl Chain {
    fn next_bytes<const N: usize>(&mut self, tag: u8) -> [u8; N] {
        self.counter += 1;
        let mut out = [0u8; N];
        out[0] = tag;
        out[N - 8..].copy_from_slice(&self.counter.to_be_bytes());
        out
    }

    fn check_proof(&self, from: Address, proof: &InputProof, handles: &[CiphertextHandle]) -> Result<(), String> {
        if self.consumed.contains(&proof.0) {
            return Err(revert::PROOF_CONSUMED.to_string());
        }
        let binding = self
            .proofs
            .get(&proof.0)
            .ok_or_else(|| revert::INVALID_PROOF.to_string())?;
        if binding.contract != CONTRACT || binding.submitter != from || binding.handles != handles {
            return Err(revert::INVALID_PROOF.to_string());
        }
        Ok(())
    }

    fn value(&self, handle: &CiphertextHandle) -> u64 {
        self.plaintexts.get(handle).copied().unwrap_or(0)
    }

    fn seal(&mut self, value: u64) -> CiphertextHandle {
        let handle = CiphertextHandle(self.next_bytes(0xe0));
        self.plaintexts.insert(handle, value);
        handle
    }

    fn adjust_payroll(&mut self, company: Address, add: u64, sub: u64) {
        let Some(current) = self.companies.get(&company).map(|c| c.payroll) else {
            return;
        };
        let total = self.value(&current).saturating_add(add).saturating_sub(sub);
        let handle = self.seal(total);
        if let Some(c) = self.companies.get_mut(&company) {
            c.payroll = handle;
        }
    }

    /// Plaintext total of a company's encrypted payroll.
    pub fn payroll_value(&self, company: Address) -> Option<u64> {
        self.companies.get(&company).map(|c| self.value(&c.payroll))
    }

    fn execute(&mut self, from: Address, call: LedgerCall, at: DateTime<Utc>) -> Result<Vec<LedgerEvent>, String> {
        match call {
            LedgerCall::RegisterCompany { name } => {
                if self.companies.contains_key(&from) {
                    return Err(revert::COMPANY_EXISTS.to_string());
                }
                let payroll = self.seal(0);
                self.companies.insert(from, CompanyRecord { name: name.clone(), payroll });
                Ok(vec![LedgerEvent::CompanyRegistered { company: from, name }])
            }
            LedgerCall::AddEmployee { employee, enc_base_salary, enc_kpi_bonus, enc_task_bonus, proof } => {
                if !self.companies.contains_key(&from) {
                    return Err(revert::COMPANY_NOT_FOUND.to_string());
                }
                if self.employees.contains_key(&(from, employee)) {
                    return Err(revert::EMPLOYEE_EXISTS.to_string());
                }
                let handles = [enc_base_salary, enc_kpi_bonus, enc_task_bonus];
                self.check_proof(from, &proof, &handles)?;
                self.consumed.insert(proof.0);
                let stored: u64 = handles.iter().map(|h| self.value(h)).sum();
                self.adjust_payroll(from, stored, 0);
                self.employees.insert(
                    (from, employee),
                    EmployeeRecord { handles, active: true, last_paid: None, paid_period: None },
                );
                Ok(vec![LedgerEvent::EmployeeAdded { company: from, employee }])
            }
            LedgerCall::PaySalary { employee, period, amount } => {
                if !self.companies.contains_key(&from) {
                    return Err(revert::COMPANY_NOT_FOUND.to_string());
                }
                let record = self
                    .employees
                    .get(&(from, employee))
                    .ok_or_else(|| revert::EMPLOYEE_NOT_FOUND.to_string())?;
                if !record.active {
                    return Err(revert::EMPLOYEE_INACTIVE.to_string());
                }
                if record.paid_period.is_some_and(|paid| period <= paid) {
                    return Err(revert::PERIOD_ALREADY_PAID.to_string());
                }
                let value = match &amount {
                    Some(a) => {
                        self.check_proof(from, &a.proof, &[a.handle])?;
                        self.value(&a.handle)
                    }
                    None => record.handles.iter().map(|h| self.value(h)).sum(),
                };
                let balance = self.balances.get(&from).copied().unwrap_or(0);
                if balance < value {
                    return Err(format!("{}: have {balance}, need {value}", revert::INSUFFICIENT_BALANCE));
                }
                if let Some(a) = amount {
                    self.consumed.insert(a.proof.0);
                }
                self.balances.insert(from, balance - value);
                *self.balances.entry(employee).or_insert(0) += value;
                if let Some(r) = self.employees.get_mut(&(from, employee)) {
                    r.last_paid = Some(at);
                    r.paid_period = Some(period);
                }
                Ok(vec![LedgerEvent::SalaryPaid { company: from, employee, timestamp: at }])
            }
            LedgerCall::DeactivateEmployee { employee } => {
                let record = self
                    .employees
                    .get_mut(&(from, employee))
                    .ok_or_else(|| revert::EMPLOYEE_NOT_FOUND.to_string())?;
                let was_active = std::mem::replace(&mut record.active, false);
                let handles = record.handles;
                if was_active {
                    let stored: u64 = handles.iter().map(|h| self.value(h)).sum();
                    self.adjust_payroll(from, 0, stored);
                }
                Ok(vec![LedgerEvent::EmployeeDeactivated { company: from, employee }])
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    chain: Mutex<Chain>,
    submits: AtomicUsize,
    encrypts: AtomicUsize,
    withhold_receipts: AtomicBool,
    encryption_down: AtomicBool,
    on_encrypt: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// In-memory node plus relayer with the payroll program's rules.
#[derive(Clone, Default)]
pub struct FakeChain {
    inner: Arc<Inner>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submits(&self) -> usize {
        self.inner.submits.load(Ordering::SeqCst)
    }

    pub fn encrypts(&self) -> usize {
        self.inner.encrypts.load(Ordering::SeqCst)
    }

    pub fn fund(&self, address: Address, amount: u64) {
        *self.inner.chain.lock().unwrap().balances.entry(address).or_insert(0) += amount;
    }

    pub fn balance(&self, address: Address) -> u64 {
        self.inner.chain.lock().unwrap().balances.get(&address).copied().unwrap_or(0)
    }

    pub fn payroll_value(&self, company: Address) -> Option<u64> {
        self.inner.chain.lock().unwrap().payroll_value(company)
    }

    /// Plaintext behind a handle the fake issued.
    pub fn plaintext(&self, handle: &CiphertextHandle) -> Option<u64> {
        self.inner.chain.lock().unwrap().plaintexts.get(handle).copied()
    }

    /// Transactions still execute, but their receipts never show up.
    pub fn withhold_receipts(&self, on: bool) {
        self.inner.withhold_receipts.store(on, Ordering::SeqCst);
    }

    pub fn fail_encryption(&self, on: bool) {
        self.inner.encryption_down.store(on, Ordering::SeqCst);
    }

    /// Run `hook` inside the next encryption round trip.
    pub fn on_next_encrypt(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.on_encrypt.lock().unwrap() = Some(Box::new(hook));
    }
}

impl LedgerProgram for FakeChain {
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxHash, PayrollError> {
        self.inner.submits.fetch_add(1, Ordering::SeqCst);
        // A real node answers asynchronously; let other flows run in between.
        tokio::task::yield_now().await;
        let mut chain = self.inner.chain.lock().unwrap();
        let tx_hash = TxHash(chain.next_bytes(0x7e));
        let at = Utc::now();
        chain.block += 1;
        let block_number = chain.block;

        let receipt = match chain.execute(from, call, at) {
            Ok(events) => TxReceipt {
                tx_hash,
                block_number,
                timestamp: at,
                status: TxStatus::Success,
                revert_reason: None,
                events,
            },
            Err(reason) => TxReceipt {
                tx_hash,
                block_number,
                timestamp: at,
                status: TxStatus::Reverted,
                revert_reason: Some(reason),
                events: Vec::new(),
            },
        };
        if self.inner.withhold_receipts.load(Ordering::SeqCst) {
            chain.withheld.insert(tx_hash, receipt);
        } else {
            chain.receipts.insert(tx_hash, receipt);
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, PayrollError> {
        Ok(self.inner.chain.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn company_info(&self, company: Address) -> Result<Option<CompanyInfo>, PayrollError> {
        let chain = self.inner.chain.lock().unwrap();
        Ok(chain.companies.get(&company).map(|c| CompanyInfo {
            name: c.name.clone(),
            employee_count: chain.employees.keys().filter(|(c, _)| *c == company).count() as u32,
        }))
    }

    async fn employee_info(&self, company: Address, employee: Address) -> Result<Option<EmployeeInfo>, PayrollError> {
        let chain = self.inner.chain.lock().unwrap();
        Ok(chain.employees.get(&(company, employee)).map(|r| EmployeeInfo {
            address: employee,
            is_active: r.active,
            last_payment_date: r.last_paid,
        }))
    }

    async fn company_employees(&self, company: Address) -> Result<Vec<Address>, PayrollError> {
        let chain = self.inner.chain.lock().unwrap();
        Ok(chain
            .employees
            .keys()
            .filter(|(c, _)| *c == company)
            .map(|(_, e)| *e)
            .collect())
    }

    async fn employee_salary(&self, company: Address, employee: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
        let chain = self.inner.chain.lock().unwrap();
        Ok(chain.employees.get(&(company, employee)).map(|r| r.handles[0]))
    }

    async fn company_payroll(&self, company: Address) -> Result<Option<CiphertextHandle>, PayrollError> {
        let chain = self.inner.chain.lock().unwrap();
        Ok(chain.companies.get(&company).map(|c| c.payroll))
    }
}

impl EncryptionService for FakeChain {
    async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptResponse, PayrollError> {
        self.inner.encrypts.fetch_add(1, Ordering::SeqCst);
        if self.inner.encryption_down.load(Ordering::SeqCst) {
            return Err(PayrollError::EncryptionServiceUnavailable("relayer offline".to_string()));
        }
        let hook = self.inner.on_encrypt.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let mut chain = self.inner.chain.lock().unwrap();
        let mut handles = Vec::with_capacity(request.values.len());
        for v in &request.values {
            let handle = CiphertextHandle(chain.next_bytes(0xee));
            chain.plaintexts.insert(handle, v.value);
            handles.push(handle);
        }
        let proof = chain.next_bytes::<16>(0x9f).to_vec();
        chain.proofs.insert(
            proof.clone(),
            ProofBinding {
                contract: request.contract,
                submitter: request.submitter,
                handles: handles.clone(),
            },
        );
        Ok(EncryptResponse { handles, proof: InputProof(proof) })
    }
}

/// Wallet shared between the service and the test body.
#[derive(Clone)]
pub struct SharedWallet {
    wallet: Arc<DevWallet>,
    chain_reads: Arc<AtomicUsize>,
    switch_at: Arc<Mutex<Option<(usize, Address)>>>,
}

impl SharedWallet {
    pub fn new(wallet: Arc<DevWallet>) -> Self {
        Self {
            wallet,
            chain_reads: Arc::new(AtomicUsize::new(0)),
            switch_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Select `signer` while answering the `nth` chain-id read from now on (1-based).
    pub fn switch_signer_on_read(&self, nth: usize, signer: Address) {
        let at = self.chain_reads.load(Ordering::SeqCst) + nth;
        *self.switch_at.lock().unwrap() = Some((at, signer));
    }
}

impl WalletSession for SharedWallet {
    async fn current_chain_id(&self) -> Result<ChainId, PayrollError> {
        let read = self.chain_reads.fetch_add(1, Ordering::SeqCst) + 1;
        let due = {
            let mut switch_at = self.switch_at.lock().unwrap();
            let pending = *switch_at;
            match pending {
                Some((at, signer)) if at == read => {
                    *switch_at = None;
                    Some(signer)
                }
                _ => None,
            }
        };
        if let Some(signer) = due {
            self.wallet.switch_account(signer)?;
        }
        self.wallet.current_chain_id().await
    }

    async fn current_signer(&self) -> Result<Address, PayrollError> {
        self.wallet.current_signer().await
    }

    async fn request_access(&self) -> Result<Vec<Address>, PayrollError> {
        self.wallet.request_access().await
    }
}

pub type TestService = PayrollService<FakeChain, FakeChain, SharedWallet>;

pub fn config(mode: PaymentMode) -> PayrollConfig {
    PayrollConfig {
        chain_id: CHAIN,
        contract_address: CONTRACT,
        confirmation_timeout: Duration::from_millis(400),
        payment_mode: mode,
        ..PayrollConfig::default()
    }
}

pub fn setup(mode: PaymentMode) -> (TestService, FakeChain, Arc<DevWallet>) {
    let chain = FakeChain::new();
    let wallet = Arc::new(DevWallet::new(CHAIN, vec![COMPANY, OUTSIDER]).unwrap());
    let service = PayrollService::new(&config(mode), chain.clone(), chain.clone(), SharedWallet::new(wallet.clone()));
    (service, chain, wallet)
}

pub fn terms(base_salary: u64, kpi_score: u8, tasks_completed: u32, total_tasks: u32) -> SalaryTerms {
    SalaryTerms {
        base_salary,
        kpi_score,
        tasks_completed,
        total_tasks,
        due_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
    }
}

/// `terms` for the cycle due on the first of `month`, 2024.
pub fn terms_due(month: u32, base_salary: u64, kpi_score: u8, tasks_completed: u32, total_tasks: u32) -> SalaryTerms {
    SalaryTerms {
        due_date: NaiveDate::from_ymd_opt(2024, month, 1).unwrap(),
        ..terms(base_salary, kpi_score, tasks_completed, total_tasks)
    }
}

/// Another service over the same chain, with an empty cache and COMPANY selected.
pub fn fresh_client(chain: &FakeChain) -> TestService {
    let wallet = Arc::new(DevWallet::new(CHAIN, vec![COMPANY]).unwrap());
    PayrollService::new(
        &config(PaymentMode::EncryptedAmount),
        chain.clone(),
        chain.clone(),
        SharedWallet::new(wallet),
    )
}

/// Company registered with ALICE on the reference terms (8000, 92, 18/20).
pub async fn onboarded(mode: PaymentMode) -> (TestService, FakeChain, Arc<DevWallet>) {
    let (service, chain, wallet) = setup(mode);
    service.register_company("Acme").await.unwrap();
    service.add_employee(ALICE, terms(8000, 92, 18, 20)).await.unwrap();
    (service, chain, wallet)
}
