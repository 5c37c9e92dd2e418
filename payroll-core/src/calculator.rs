//! Payment-plan arithmetic.
//!
//! All amounts are integer minor units. Each bonus is derived directly from the raw inputs in
//! 128-bit arithmetic and rounded half-up once; the total is the exact sum of the rounded parts.

use crate::constants::{BPS_DENOMINATOR, KPI_BONUS_RATE_BPS, MAX_KPI_SCORE, TASK_BONUS_RATE_BPS};
use crate::errors::PayrollError;
use crate::types::{Address, Amount, PaymentPlan, PaymentStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Bonus rates in basis points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRates {
    pub kpi_bps: u32,
    pub task_bps: u32,
}

impl Default for BonusRates {
    fn default() -> Self {
        Self {
            kpi_bps: KPI_BONUS_RATE_BPS,
            task_bps: TASK_BONUS_RATE_BPS,
        }
    }
}

/// Integer division rounding half-up. `den` must be non-zero.
fn div_round_half_up(num: u128, den: u128) -> u128 {
    (num + den / 2) / den
}

fn to_amount(v: u128, what: &str) -> Result<Amount, PayrollError> {
    Amount::try_from(v).map_err(|_| PayrollError::InvalidAmount(format!("{what} overflows u64")))
}

/// `round(kpi_score / 100 * rate * base_salary)`.
pub fn kpi_bonus(base_salary: Amount, kpi_score: u8, rates: &BonusRates) -> Result<Amount, PayrollError> {
    let num = base_salary as u128 * kpi_score as u128 * rates.kpi_bps as u128;
    let den = MAX_KPI_SCORE as u128 * BPS_DENOMINATOR;
    to_amount(div_round_half_up(num, den), "kpi bonus")
}

/// `round(tasks_completed / total_tasks * rate * base_salary)`; zero when there are no tasks.
pub fn task_bonus(
    base_salary: Amount,
    tasks_completed: u32,
    total_tasks: u32,
    rates: &BonusRates,
) -> Result<Amount, PayrollError> {
    if total_tasks == 0 {
        return Ok(0);
    }
    let num = base_salary as u128 * tasks_completed as u128 * rates.task_bps as u128;
    let den = total_tasks as u128 * BPS_DENOMINATOR;
    to_amount(div_round_half_up(num, den), "task bonus")
}

/// Compute a pending plan with the fixed bonus rates.
pub fn compute_plan(
    employee: Address,
    base_salary: Amount,
    kpi_score: u8,
    tasks_completed: u32,
    total_tasks: u32,
    due_date: NaiveDate,
) -> Result<PaymentPlan, PayrollError> {
    compute_plan_with_rates(
        &BonusRates::default(),
        employee,
        base_salary,
        kpi_score,
        tasks_completed,
        total_tasks,
        due_date,
    )
}

pub fn compute_plan_with_rates(
    rates: &BonusRates,
    employee: Address,
    base_salary: Amount,
    kpi_score: u8,
    tasks_completed: u32,
    total_tasks: u32,
    due_date: NaiveDate,
) -> Result<PaymentPlan, PayrollError> {
    if base_salary == 0 {
        return Err(PayrollError::InvalidAmount("base salary must be positive".to_string()));
    }
    if kpi_score > MAX_KPI_SCORE {
        return Err(PayrollError::InvalidAmount(format!(
            "kpi score {kpi_score} exceeds {MAX_KPI_SCORE}"
        )));
    }
    if tasks_completed > total_tasks {
        return Err(PayrollError::InvalidAmount(format!(
            "tasks completed {tasks_completed} exceeds total {total_tasks}"
        )));
    }

    let kpi = kpi_bonus(base_salary, kpi_score, rates)?;
    let task = task_bonus(base_salary, tasks_completed, total_tasks, rates)?;
    let total = base_salary
        .checked_add(kpi)
        .and_then(|t| t.checked_add(task))
        .ok_or_else(|| PayrollError::InvalidAmount("total amount overflows u64".to_string()))?;

    Ok(PaymentPlan {
        employee,
        base_amount: base_salary,
        kpi_bonus: kpi,
        task_bonus: task,
        total_amount: total,
        status: PaymentStatus::Pending,
        due_date,
    })
}

/// Aggregate view over a set of plans (the payroll-fund overview).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollSummary {
    pub plan_count: u64,
    pub paid_count: u64,
    pub total_base: u128,
    pub total_bonus: u128,
    pub total_amount: u128,
    /// Rounded half-up; `None` for an empty set.
    pub average_amount: Option<u128>,
}

pub fn summarize<'a>(plans: impl IntoIterator<Item = &'a PaymentPlan>) -> PayrollSummary {
    let mut s = PayrollSummary::default();
    for p in plans {
        s.plan_count += 1;
        if p.status == PaymentStatus::Paid {
            s.paid_count += 1;
        }
        s.total_base += p.base_amount as u128;
        s.total_bonus += p.bonus_amount() as u128;
        s.total_amount += p.total_amount as u128;
    }
    if s.plan_count > 0 {
        s.average_amount = Some(div_round_half_up(s.total_amount, s.plan_count as u128));
    }
    s
}
