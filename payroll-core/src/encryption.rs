//! Client-side construction of encrypted inputs.
//!
//! One builder collects plaintext values for one contract call and turns them into ciphertext
//! handles plus a single proof with one round trip to the encryption service. Handle order is
//! the order values were added; it maps one-to-one onto the call's parameter list and must never
//! be reordered.

use crate::errors::PayrollError;
use crate::types::{
    Address, BitWidth, CiphertextHandle, EncryptRequest, EncryptResponse, EncryptedAmount,
    InputProof, PlainValue,
};
use tracing::debug;

/// The remote encryption service (relayer).
#[allow(async_fn_in_trait)]
pub trait EncryptionService {
    async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptResponse, PayrollError>;
}

/// Output of one finalized builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedInput {
    pub contract: Address,
    pub submitter: Address,
    pub handles: Vec<CiphertextHandle>,
    pub proof: InputProof,
}

impl EncryptedInput {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// True when the proof was produced for this contract and this submitter.
    pub fn is_bound_to(&self, contract: &Address, submitter: &Address) -> bool {
        self.contract == *contract && self.submitter == *submitter
    }

    /// Collapse a single-value input into the call argument shape.
    pub fn into_amount(self) -> Result<EncryptedAmount, PayrollError> {
        let got = self.handles.len();
        let [handle]: [CiphertextHandle; 1] = self.handles.try_into().map_err(|_| {
            PayrollError::InvalidAmount(format!("expected one encrypted amount, got {got}"))
        })?;
        Ok(EncryptedAmount { handle, proof: self.proof })
    }
}

/// Collects values for one encrypted input. Consumed by [`finalize`](Self::finalize).
#[derive(Debug)]
#[must_use]
pub struct EncryptedValueBuilder {
    contract: Address,
    submitter: Address,
    values: Vec<PlainValue>,
}

impl EncryptedValueBuilder {
    /// Open a batch bound to one contract and one submitter.
    pub fn begin(contract: Address, submitter: Address) -> Self {
        Self {
            contract,
            submitter,
            values: Vec::new(),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn submitter(&self) -> Address {
        self.submitter
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append one value of a declared width.
    ///
    /// Signed input so negative amounts are caught here rather than wrapping at a cast site.
    pub fn add_value(&mut self, width: BitWidth, value: i128) -> Result<&mut Self, PayrollError> {
        if value < 0 {
            return Err(PayrollError::InvalidAmount(format!("negative value {value}")));
        }
        if value > width.max_value() as i128 {
            return Err(PayrollError::InvalidAmount(format!(
                "value {value} does not fit in {} bits",
                width.bits()
            )));
        }
        self.values.push(PlainValue {
            width,
            value: value as u64,
        });
        Ok(self)
    }

    pub fn add_u64(&mut self, value: u64) -> &mut Self {
        self.values.push(PlainValue {
            width: BitWidth::U64,
            value,
        });
        self
    }

    /// Encrypt every value in one remote call.
    pub async fn finalize<S: EncryptionService>(self, service: &S) -> Result<EncryptedInput, PayrollError> {
        if self.values.is_empty() {
            return Err(PayrollError::InvalidAmount("nothing to encrypt".to_string()));
        }

        let expected = self.values.len();
        let request = EncryptRequest {
            contract: self.contract,
            submitter: self.submitter,
            values: self.values,
        };

        let response = service.encrypt(request).await?;

        if response.handles.len() != expected {
            return Err(PayrollError::EncryptionServiceUnavailable(format!(
                "service returned {} handles for {expected} values",
                response.handles.len()
            )));
        }
        if response.proof.0.is_empty() {
            return Err(PayrollError::EncryptionServiceUnavailable("service returned an empty proof".to_string()));
        }

        debug!(contract = %self.contract, submitter = %self.submitter, values = expected, "encrypted input ready");

        Ok(EncryptedInput {
            contract: self.contract,
            submitter: self.submitter,
            handles: response.handles,
            proof: response.proof,
        })
    }
}
