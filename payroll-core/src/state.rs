//! Client-side cache of confirmed payroll state, plus the payment-status state machine.
//!
//! Nothing here talks to the network. Every `apply_*` method records an outcome the ledger has
//! already confirmed; the cache can be rebuilt from read views at any time.

use crate::errors::PayrollError;
use crate::types::{
    Address, Amount, CiphertextHandle, Company, CompanyInfo, Employee, EmployeeInfo, PaymentPlan,
    PaymentStatus,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// (company, employee)
type EmployeeKey = (Address, Address);

const MIN_ADDRESS: Address = Address([0u8; 20]);
const MAX_ADDRESS: Address = Address([0xffu8; 20]);

/// Read views of one company, as fetched for a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyView {
    pub info: CompanyInfo,
    pub total_payroll: Option<CiphertextHandle>,
    pub employees: Vec<EmployeeView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeView {
    pub info: EmployeeInfo,
    pub base_salary: Option<CiphertextHandle>,
}

#[derive(Debug, Default, Clone)]
pub struct PayrollState {
    companies: HashMap<Address, Company>,
    employees: BTreeMap<EmployeeKey, Employee>,
    plans: HashMap<EmployeeKey, PaymentPlan>,
    /// Plan totals whose components were encrypted at `addEmployee`; what the program pays
    /// when settling from the stored handles.
    stored_totals: HashMap<EmployeeKey, Amount>,
    /// Plans with a payment between claim and outcome.
    in_flight: HashSet<EmployeeKey>,
}

impl PayrollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company(&self, company: &Address) -> Option<&Company> {
        self.companies.get(company)
    }

    pub fn employee(&self, company: &Address, employee: &Address) -> Option<&Employee> {
        self.employees.get(&(*company, *employee))
    }

    pub fn plan(&self, company: &Address, employee: &Address) -> Option<&PaymentPlan> {
        self.plans.get(&(*company, *employee))
    }

    /// Employees of one company, ordered by address.
    pub fn employees_of(&self, company: &Address) -> impl Iterator<Item = &Employee> + '_ {
        self.employees
            .range((*company, MIN_ADDRESS)..=(*company, MAX_ADDRESS))
            .map(|(_, e)| e)
    }

    pub fn stored_total(&self, company: &Address, employee: &Address) -> Option<Amount> {
        self.stored_totals.get(&(*company, *employee)).copied()
    }

    pub fn is_in_flight(&self, company: &Address, employee: &Address) -> bool {
        self.in_flight.contains(&(*company, *employee))
    }

    pub fn plans_of(&self, company: &Address) -> Vec<&PaymentPlan> {
        self.employees_of(company)
            .filter_map(|e| self.plans.get(&(*company, e.address)))
            .collect()
    }

    pub fn apply_company_registered(&mut self, company: Address, name: String) {
        debug!(%company, %name, "company cached");
        self.companies
            .entry(company)
            .and_modify(|c| c.name = name.clone())
            .or_insert(Company {
                address: company,
                name,
                employee_count: 0,
                total_payroll: None,
            });
    }

    /// Record a confirmed `addEmployee` together with the employee's first plan.
    pub fn apply_employee_added(&mut self, employee: Employee, plan: PaymentPlan) -> Result<(), PayrollError> {
        let key = (employee.company_address, employee.address);
        let company = self
            .companies
            .get_mut(&employee.company_address)
            .ok_or_else(|| PayrollError::NotFound(format!("company {}", employee.company_address)))?;

        if !self.employees.contains_key(&key) {
            company.employee_count += 1;
        }
        company.total_payroll = None;
        debug!(company = %key.0, employee = %key.1, total = plan.total_amount, "employee cached");
        self.employees.insert(key, employee);
        self.stored_totals.insert(key, plan.total_amount);
        self.plans.insert(key, plan);
        Ok(())
    }

    /// The plan that a payment for this employee would settle.
    ///
    /// Fails with `AlreadyPaid` for a settled plan; never touches the network.
    pub fn check_payable(&self, company: &Address, employee: &Address) -> Result<&PaymentPlan, PayrollError> {
        let plan = self
            .plan(company, employee)
            .ok_or_else(|| PayrollError::NotFound(format!("payment plan for {employee}")))?;
        if !plan.status.is_payable() {
            return Err(PayrollError::AlreadyPaid(*employee));
        }
        Ok(plan)
    }

    /// Mark the open plan as being paid and return a copy of it.
    ///
    /// Fails with `AlreadyPaid` for a settled plan and with `PaymentInProgress` while another
    /// claim on the same plan is outstanding. Pair with [`release_payment`](Self::release_payment).
    pub fn claim_payment(&mut self, company: &Address, employee: &Address) -> Result<PaymentPlan, PayrollError> {
        let plan = self.check_payable(company, employee)?.clone();
        if !self.in_flight.insert((*company, *employee)) {
            return Err(PayrollError::PaymentInProgress(*employee));
        }
        Ok(plan)
    }

    pub fn release_payment(&mut self, company: &Address, employee: &Address) {
        self.in_flight.remove(&(*company, *employee));
    }

    /// Local approval step: `pending -> approved`.
    pub fn approve(&mut self, company: &Address, employee: &Address) -> Result<(), PayrollError> {
        self.transition(&(*company, *employee), PaymentStatus::Approved)
    }

    /// Record a confirmed payment at the ledger's block timestamp.
    pub fn apply_salary_paid(
        &mut self,
        company: &Address,
        employee: &Address,
        settled_at: DateTime<Utc>,
    ) -> Result<(), PayrollError> {
        let key = (*company, *employee);
        if !self.employees.contains_key(&key) {
            return Err(PayrollError::NotFound(format!("employee {employee}")));
        }
        self.transition(&key, PaymentStatus::Paid)?;
        if let Some(e) = self.employees.get_mut(&key) {
            e.last_payment_date = Some(settled_at);
        }
        Ok(())
    }

    pub fn apply_employee_deactivated(&mut self, company: &Address, employee: &Address) -> Result<(), PayrollError> {
        let e = self
            .employees
            .get_mut(&(*company, *employee))
            .ok_or_else(|| PayrollError::NotFound(format!("employee {employee}")))?;
        e.is_active = false;
        if let Some(c) = self.companies.get_mut(company) {
            c.total_payroll = None;
        }
        Ok(())
    }

    /// Replace a settled plan with the next billing cycle's plan.
    pub fn schedule_next_cycle(
        &mut self,
        company: &Address,
        employee: &Address,
        plan: PaymentPlan,
    ) -> Result<(), PayrollError> {
        let key = (*company, *employee);
        if !self.employees.contains_key(&key) {
            return Err(PayrollError::NotFound(format!("employee {employee}")));
        }
        if plan.status != PaymentStatus::Pending {
            return Err(PayrollError::InvalidTransition {
                from: PaymentStatus::Pending,
                to: plan.status,
            });
        }
        if let Some(current) = self.plans.get(&key) {
            if current.status != PaymentStatus::Paid {
                return Err(PayrollError::InvalidTransition {
                    from: current.status,
                    to: PaymentStatus::Pending,
                });
            }
            // The program settles each period once.
            if plan.due_date <= current.due_date {
                return Err(PayrollError::InvalidAmount(format!(
                    "next cycle due {} must come after {}",
                    plan.due_date, current.due_date
                )));
            }
        }
        self.plans.insert(key, plan);
        Ok(())
    }

    /// Overwrite cached company and employee entries with what the ledger reports.
    ///
    /// A ledger payment date newer than the cached one means a payment landed that this cache
    /// never saw confirmed (e.g. after a confirmation timeout); its open plan is settled.
    /// Returns the employees whose plans were settled this way.
    pub fn reconcile_company(&mut self, company: Address, view: CompanyView) -> Vec<Address> {
        self.companies.insert(
            company,
            Company {
                address: company,
                name: view.info.name,
                employee_count: view.info.employee_count,
                total_payroll: view.total_payroll,
            },
        );

        let mut settled = Vec::new();
        for EmployeeView { info: remote, base_salary } in view.employees {
            let key = (company, remote.address);
            let entry = self.employees.entry(key).or_insert_with(|| Employee {
                address: remote.address,
                company_address: company,
                base_salary: None,
                kpi_score: 0,
                tasks_completed: 0,
                total_tasks: 0,
                is_active: remote.is_active,
                last_payment_date: None,
            });
            if base_salary.is_some() {
                entry.base_salary = base_salary;
            }

            let newer_payment = match (entry.last_payment_date, remote.last_payment_date) {
                (None, Some(_)) => true,
                (Some(cached), Some(ledger)) => ledger > cached,
                _ => false,
            };

            entry.is_active = remote.is_active;
            entry.last_payment_date = remote.last_payment_date;

            if newer_payment {
                if let Some(plan) = self.plans.get_mut(&key) {
                    if plan.status.is_payable() {
                        plan.status = PaymentStatus::Paid;
                        settled.push(remote.address);
                    }
                }
            }
        }
        settled
    }

    fn transition(&mut self, key: &EmployeeKey, next: PaymentStatus) -> Result<(), PayrollError> {
        let plan = self
            .plans
            .get_mut(key)
            .ok_or_else(|| PayrollError::NotFound(format!("payment plan for {}", key.1)))?;

        match plan.status {
            PaymentStatus::Paid => Err(PayrollError::AlreadyPaid(key.1)),
            current if current == next => Ok(()),
            current if current.can_transition_to(next) => {
                debug!(employee = %key.1, from = %current, to = %next, "plan status advanced");
                plan.status = next;
                Ok(())
            }
            current => Err(PayrollError::InvalidTransition { from: current, to: next }),
        }
    }
}
