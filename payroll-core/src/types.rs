//! Types shared by the client core and the devnet.
//!
//! Everything that crosses the wire (ledger calls, receipts, encryption requests) lives here so
//! both sides serialize the same shapes. Byte identifiers are rendered as `0x`-prefixed hex.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHexError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

fn decode_prefixed(s: &str) -> Result<Vec<u8>, ParseHexError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(digits).map_err(|e| ParseHexError::InvalidHex(e.to_string()))
}

/// Fixed-size byte identifier rendered as `0x`-prefixed lowercase hex.
macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_prefixed(s)?;
                let got = bytes.len();
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| ParseHexError::Length { expected: $len, got })?;
                Ok(Self(arr))
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseHexError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.to_string()
            }
        }
    };
}

hex_id!(
    /// Account or contract address on the ledger.
    Address,
    20
);

hex_id!(
    /// Transaction hash.
    TxHash,
    32
);

hex_id!(
    /// Opaque reference to one encrypted value held by the encryption service.
    CiphertextHandle,
    32
);

/// Proof binding a batch of ciphertext handles to one contract and one submitter.
///
/// Single-use: the ledger program consumes it on first submission.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputProof(pub Vec<u8>);

impl fmt::Display for InputProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for InputProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputProof({} bytes)", self.0.len())
    }
}

impl FromStr for InputProof {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed(s).map(Self)
    }
}

impl TryFrom<String> for InputProof {
    type Error = ParseHexError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InputProof> for String {
    fn from(v: InputProof) -> String {
        v.to_string()
    }
}

/// Network identifier reported by the wallet.
pub type ChainId = u64;

/// Amount in minor units of the settlement currency.
pub type Amount = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub address: Address,
    pub name: String,
    pub employee_count: u32,
    /// Encrypted running total of what the company owes its active employees per cycle.
    ///
    /// Only known as of the last refresh; cleared whenever a confirmed call changes it.
    pub total_payroll: Option<CiphertextHandle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub address: Address,
    /// Back-reference to the employing company.
    pub company_address: Address,
    /// Ciphertext handle of the base salary once it has been submitted.
    pub base_salary: Option<CiphertextHandle>,
    pub kpi_score: u8,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub is_active: bool,
    pub last_payment_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Paid,
}

impl PaymentStatus {
    /// Forward-only transitions: `pending -> approved -> paid`, plus `pending -> paid`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Approved)
                | (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Approved, PaymentStatus::Paid)
        )
    }

    pub fn is_payable(self) -> bool {
        !matches!(self, PaymentStatus::Paid)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Paid => "paid",
        };
        f.write_str(s)
    }
}

/// Salary breakdown and settlement status for one employee's upcoming payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub employee: Address,
    pub base_amount: Amount,
    pub kpi_bonus: Amount,
    pub task_bonus: Amount,
    pub total_amount: Amount,
    pub status: PaymentStatus,
    pub due_date: NaiveDate,
}

impl PaymentPlan {
    pub fn bonus_amount(&self) -> Amount {
        self.kpi_bonus + self.task_bonus
    }
}

/// Fixed widths supported by the encryption scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitWidth {
    U8,
    U16,
    U32,
    U64,
}

impl BitWidth {
    pub fn bits(self) -> u32 {
        match self {
            BitWidth::U8 => 8,
            BitWidth::U16 => 16,
            BitWidth::U32 => 32,
            BitWidth::U64 => 64,
        }
    }

    pub fn max_value(self) -> u64 {
        match self {
            BitWidth::U8 => u8::MAX as u64,
            BitWidth::U16 => u16::MAX as u64,
            BitWidth::U32 => u32::MAX as u64,
            BitWidth::U64 => u64::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainValue {
    pub width: BitWidth,
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub contract: Address,
    pub submitter: Address,
    /// Values in parameter order. The reply's handles follow the same order.
    pub values: Vec<PlainValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub handles: Vec<CiphertextHandle>,
    pub proof: InputProof,
}

/// One encrypted amount plus the proof that admits it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedAmount {
    pub handle: CiphertextHandle,
    pub proof: InputProof,
}

/// A call to the payroll program, encoding its full parameter list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerCall {
    RegisterCompany {
        name: String,
    },
    AddEmployee {
        employee: Address,
        enc_base_salary: CiphertextHandle,
        enc_kpi_bonus: CiphertextHandle,
        enc_task_bonus: CiphertextHandle,
        proof: InputProof,
    },
    PaySalary {
        employee: Address,
        /// Due date of the billing cycle being settled. The program pays each period once.
        period: NaiveDate,
        /// Encrypted amount when the program settles a per-payment ciphertext;
        /// `None` pays the stored base salary.
        amount: Option<EncryptedAmount>,
    },
    DeactivateEmployee {
        employee: Address,
    },
}

impl LedgerCall {
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::RegisterCompany { .. } => "registerCompany",
            LedgerCall::AddEmployee { .. } => "addEmployee",
            LedgerCall::PaySalary { .. } => "paySalary",
            LedgerCall::DeactivateEmployee { .. } => "deactivateEmployee",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmission {
    pub from: Address,
    pub call: LedgerCall,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmitted {
    pub tx_hash: TxHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    CompanyRegistered {
        company: Address,
        name: String,
    },
    EmployeeAdded {
        company: Address,
        employee: Address,
    },
    SalaryPaid {
        company: Address,
        employee: Address,
        timestamp: DateTime<Utc>,
    },
    EmployeeDeactivated {
        company: Address,
        employee: Address,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Reverted,
}

/// A confirmed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Block timestamp; the settlement time recorded for payments.
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    pub revert_reason: Option<String>,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub employee_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeInfo {
    pub address: Address,
    pub is_active: bool,
    pub last_payment_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub chain_id: ChainId,
    pub contract: Address,
}
