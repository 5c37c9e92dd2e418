use crate::errors::{internal, ApiError};
use chrono::{DateTime, NaiveDate, Utc};
use payroll_core::types::{Address, BitWidth, CiphertextHandle, InputProof, TxHash, TxReceipt, TxStatus};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite, SqliteExecutor};
use std::fmt::Display;
use std::str::FromStr;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("{db_url}?mode=rwc"))
        .await
        .map_err(internal)
}

/// A private in-memory ledger. One connection that is never recycled, so the data lives as long
/// as the pool.
pub async fn connect_in_memory() -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .map_err(internal)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Amounts behind ciphertext handles are full u64, so they are kept as decimal text.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS accounts (
  address TEXT PRIMARY KEY,
  balance INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS companies (
  address TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  payroll_handle TEXT NOT NULL,
  registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS employees (
  company TEXT NOT NULL,
  employee TEXT NOT NULL,
  salary_handle TEXT NOT NULL,
  kpi_bonus_handle TEXT NOT NULL,
  task_bonus_handle TEXT NOT NULL,
  is_active INTEGER NOT NULL,
  last_payment_date TEXT,
  paid_period TEXT,
  PRIMARY KEY(company, employee)
);

CREATE TABLE IF NOT EXISTS ciphertexts (
  handle TEXT PRIMARY KEY,
  bits INTEGER NOT NULL,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS proofs (
  proof TEXT PRIMARY KEY,
  contract TEXT NOT NULL,
  submitter TEXT NOT NULL,
  handles_json TEXT NOT NULL,
  consumed INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
  tx_hash TEXT PRIMARY KEY,
  block_number INTEGER NOT NULL,
  sender TEXT NOT NULL,
  method TEXT NOT NULL,
  status TEXT NOT NULL,
  receipt_json TEXT NOT NULL
);
"#,
    )
    .execute(db)
    .await
    .map_err(internal)?;

    Ok(())
}

fn parse<T>(s: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse().map_err(internal)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ApiError> {
    Ok(DateTime::parse_from_rfc3339(s).map_err(internal)?.with_timezone(&Utc))
}

pub struct CompanyRow {
    pub name: String,
    pub employee_count: u32,
    /// Encrypted sum of the stored compensation of active employees.
    pub payroll_handle: CiphertextHandle,
}

pub struct EmployeeRow {
    /// Base salary, KPI bonus, task bonus.
    pub handles: [CiphertextHandle; 3],
    pub is_active: bool,
    pub last_payment_date: Option<DateTime<Utc>>,
    /// Due date of the latest settled billing cycle.
    pub paid_period: Option<NaiveDate>,
}

impl EmployeeRow {
    pub fn salary_handle(&self) -> CiphertextHandle {
        self.handles[0]
    }
}

pub struct ProofRow {
    pub contract: Address,
    pub submitter: Address,
    pub handles: Vec<CiphertextHandle>,
    pub consumed: bool,
}

pub async fn balance<'e>(ex: impl SqliteExecutor<'e>, address: &Address) -> Result<u64, ApiError> {
    let row = sqlx::query(r#"SELECT balance FROM accounts WHERE address = ?"#)
        .bind(address.to_string())
        .fetch_optional(ex)
        .await
        .map_err(internal)?;

    let Some(row) = row else { return Ok(0); };
    let balance: i64 = row.get(0);
    u64::try_from(balance).map_err(internal)
}

pub async fn set_balance<'e>(ex: impl SqliteExecutor<'e>, address: &Address, balance: u64) -> Result<(), ApiError> {
    let balance = i64::try_from(balance)
        .map_err(|_| ApiError::BadRequest(format!("balance {balance} exceeds the devnet limit")))?;

    sqlx::query(
        r#"INSERT INTO accounts (address, balance) VALUES (?, ?)
           ON CONFLICT(address) DO UPDATE SET balance = excluded.balance"#,
    )
    .bind(address.to_string())
    .bind(balance)
    .execute(ex)
    .await
    .map_err(internal)?;

    Ok(())
}

pub async fn company<'e>(ex: impl SqliteExecutor<'e>, address: &Address) -> Result<Option<CompanyRow>, ApiError> {
    let row = sqlx::query(
        r#"SELECT c.name, (SELECT COUNT(*) FROM employees e WHERE e.company = c.address), c.payroll_handle
           FROM companies c WHERE c.address = ?"#,
    )
    .bind(address.to_string())
    .fetch_optional(ex)
    .await
    .map_err(internal)?;

    let Some(row) = row else { return Ok(None); };
    let name: String = row.get(0);
    let count: i64 = row.get(1);
    let payroll_handle: String = row.get(2);
    Ok(Some(CompanyRow {
        name,
        employee_count: count as u32,
        payroll_handle: parse(&payroll_handle)?,
    }))
}

pub async fn insert_company<'e>(
    ex: impl SqliteExecutor<'e>,
    address: &Address,
    name: &str,
    payroll_handle: &CiphertextHandle,
    at: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(r#"INSERT INTO companies (address, name, payroll_handle, registered_at) VALUES (?, ?, ?, ?)"#)
        .bind(address.to_string())
        .bind(name.to_string())
        .bind(payroll_handle.to_string())
        .bind(at.to_rfc3339())
        .execute(ex)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn set_company_payroll<'e>(
    ex: impl SqliteExecutor<'e>,
    address: &Address,
    payroll_handle: &CiphertextHandle,
) -> Result<(), ApiError> {
    sqlx::query(r#"UPDATE companies SET payroll_handle = ? WHERE address = ?"#)
        .bind(payroll_handle.to_string())
        .bind(address.to_string())
        .execute(ex)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn employee<'e>(
    ex: impl SqliteExecutor<'e>,
    company: &Address,
    employee: &Address,
) -> Result<Option<EmployeeRow>, ApiError> {
    let row = sqlx::query(
        r#"SELECT salary_handle, kpi_bonus_handle, task_bonus_handle, is_active, last_payment_date, paid_period
           FROM employees WHERE company = ? AND employee = ?"#,
    )
    .bind(company.to_string())
    .bind(employee.to_string())
    .fetch_optional(ex)
    .await
    .map_err(internal)?;

    let Some(row) = row else { return Ok(None); };
    let salary_handle: String = row.get(0);
    let kpi_bonus_handle: String = row.get(1);
    let task_bonus_handle: String = row.get(2);
    let is_active: i64 = row.get(3);
    let last_payment_date: Option<String> = row.get(4);
    let paid_period: Option<String> = row.get(5);

    Ok(Some(EmployeeRow {
        handles: [parse(&salary_handle)?, parse(&kpi_bonus_handle)?, parse(&task_bonus_handle)?],
        is_active: is_active == 1,
        last_payment_date: last_payment_date.as_deref().map(parse_time).transpose()?,
        paid_period: paid_period.as_deref().map(parse).transpose()?,
    }))
}

/// `handles` in parameter order: base salary, KPI bonus, task bonus.
pub async fn insert_employee<'e>(
    ex: impl SqliteExecutor<'e>,
    company: &Address,
    employee: &Address,
    handles: &[CiphertextHandle; 3],
) -> Result<(), ApiError> {
    sqlx::query(
        r#"INSERT INTO employees
           (company, employee, salary_handle, kpi_bonus_handle, task_bonus_handle, is_active, last_payment_date)
           VALUES (?, ?, ?, ?, ?, 1, NULL)"#,
    )
    .bind(company.to_string())
    .bind(employee.to_string())
    .bind(handles[0].to_string())
    .bind(handles[1].to_string())
    .bind(handles[2].to_string())
    .execute(ex)
    .await
    .map_err(internal)?;
    Ok(())
}

pub async fn deactivate_employee<'e>(
    ex: impl SqliteExecutor<'e>,
    company: &Address,
    employee: &Address,
) -> Result<(), ApiError> {
    sqlx::query(r#"UPDATE employees SET is_active = 0 WHERE company = ? AND employee = ?"#)
        .bind(company.to_string())
        .bind(employee.to_string())
        .execute(ex)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn set_last_payment<'e>(
    ex: impl SqliteExecutor<'e>,
    company: &Address,
    employee: &Address,
    period: NaiveDate,
    at: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"UPDATE employees SET last_payment_date = ?, paid_period = ?
           WHERE company = ? AND employee = ?"#,
    )
    .bind(at.to_rfc3339())
    .bind(period.to_string())
    .bind(company.to_string())
    .bind(employee.to_string())
    .execute(ex)
    .await
    .map_err(internal)?;
    Ok(())
}

pub async fn company_employees<'e>(ex: impl SqliteExecutor<'e>, company: &Address) -> Result<Vec<Address>, ApiError> {
    let rows = sqlx::query(r#"SELECT employee FROM employees WHERE company = ? ORDER BY employee"#)
        .bind(company.to_string())
        .fetch_all(ex)
        .await
        .map_err(internal)?;

    rows.iter()
        .map(|row| {
            let employee: String = row.get(0);
            parse(&employee)
        })
        .collect()
}

pub async fn insert_ciphertext<'e>(
    ex: impl SqliteExecutor<'e>,
    handle: &CiphertextHandle,
    width: BitWidth,
    value: u64,
) -> Result<(), ApiError> {
    sqlx::query(r#"INSERT INTO ciphertexts (handle, bits, value) VALUES (?, ?, ?)"#)
        .bind(handle.to_string())
        .bind(width.bits() as i64)
        .bind(value.to_string())
        .execute(ex)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn ciphertext_value<'e>(ex: impl SqliteExecutor<'e>, handle: &CiphertextHandle) -> Result<Option<u64>, ApiError> {
    let row = sqlx::query(r#"SELECT value FROM ciphertexts WHERE handle = ?"#)
        .bind(handle.to_string())
        .fetch_optional(ex)
        .await
        .map_err(internal)?;

    let Some(row) = row else { return Ok(None); };
    let value: String = row.get(0);
    parse(&value).map(Some)
}

pub async fn insert_proof<'e>(
    ex: impl SqliteExecutor<'e>,
    proof: &InputProof,
    contract: &Address,
    submitter: &Address,
    handles: &[CiphertextHandle],
) -> Result<(), ApiError> {
    let handles_json = serde_json::to_string(handles).map_err(internal)?;

    sqlx::query(
        r#"INSERT INTO proofs (proof, contract, submitter, handles_json, consumed)
           VALUES (?, ?, ?, ?, 0)"#,
    )
    .bind(proof.to_string())
    .bind(contract.to_string())
    .bind(submitter.to_string())
    .bind(handles_json)
    .execute(ex)
    .await
    .map_err(internal)?;
    Ok(())
}

pub async fn proof<'e>(ex: impl SqliteExecutor<'e>, proof: &InputProof) -> Result<Option<ProofRow>, ApiError> {
    let row = sqlx::query(r#"SELECT contract, submitter, handles_json, consumed FROM proofs WHERE proof = ?"#)
        .bind(proof.to_string())
        .fetch_optional(ex)
        .await
        .map_err(internal)?;

    let Some(row) = row else { return Ok(None); };
    let contract: String = row.get(0);
    let submitter: String = row.get(1);
    let handles_json: String = row.get(2);
    let consumed: i64 = row.get(3);

    Ok(Some(ProofRow {
        contract: parse(&contract)?,
        submitter: parse(&submitter)?,
        handles: serde_json::from_str(&handles_json).map_err(internal)?,
        consumed: consumed == 1,
    }))
}

pub async fn consume_proof<'e>(ex: impl SqliteExecutor<'e>, proof: &InputProof) -> Result<(), ApiError> {
    sqlx::query(r#"UPDATE proofs SET consumed = 1 WHERE proof = ?"#)
        .bind(proof.to_string())
        .execute(ex)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn next_block_number<'e>(ex: impl SqliteExecutor<'e>) -> Result<u64, ApiError> {
    let row = sqlx::query(r#"SELECT COALESCE(MAX(block_number), 0) AS n FROM transactions"#)
        .fetch_one(ex)
        .await
        .map_err(internal)?;
    let n: i64 = row.get("n");
    Ok(n as u64 + 1)
}

pub async fn insert_transaction<'e>(
    ex: impl SqliteExecutor<'e>,
    receipt: &TxReceipt,
    sender: &Address,
    method: &str,
) -> Result<(), ApiError> {
    let receipt_json = serde_json::to_string(receipt).map_err(internal)?;
    let status = match receipt.status {
        TxStatus::Success => "success",
        TxStatus::Reverted => "reverted",
    };

    sqlx::query(
        r#"INSERT INTO transactions (tx_hash, block_number, sender, method, status, receipt_json)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(receipt.tx_hash.to_string())
    .bind(receipt.block_number as i64)
    .bind(sender.to_string())
    .bind(method.to_string())
    .bind(status)
    .bind(receipt_json)
    .execute(ex)
    .await
    .map_err(internal)?;
    Ok(())
}

pub async fn transaction<'e>(ex: impl SqliteExecutor<'e>, tx_hash: &TxHash) -> Result<Option<TxReceipt>, ApiError> {
    let row = sqlx::query(r#"SELECT receipt_json FROM transactions WHERE tx_hash = ?"#)
        .bind(tx_hash.to_string())
        .fetch_optional(ex)
        .await
        .map_err(internal)?;

    let Some(row) = row else { return Ok(None); };
    let receipt_json: String = row.get(0);
    serde_json::from_str(&receipt_json).map(Some).map_err(internal)
}
