//! Stand-in for the encryption relayer.
//!
//! Handles are random and opaque to clients. The plaintext behind each one is kept so the
//! program can evaluate encrypted amounts, which a real coprocessor would do homomorphically.

use crate::db;
use crate::errors::{internal, ApiError};
use crate::state::AppState;
use payroll_core::types::{CiphertextHandle, EncryptRequest, EncryptResponse, InputProof};
use tracing::debug;

pub const PROOF_LEN: usize = 32;

pub async fn encrypt(state: &AppState, req: EncryptRequest) -> Result<EncryptResponse, ApiError> {
    if req.values.is_empty() {
        return Err(ApiError::BadRequest("no values to encrypt".to_string()));
    }
    for (i, v) in req.values.iter().enumerate() {
        if v.value > v.width.max_value() {
            return Err(ApiError::BadRequest(format!(
                "value #{i} does not fit in {} bits",
                v.width.bits()
            )));
        }
    }

    let handles: Vec<CiphertextHandle> = req.values.iter().map(|_| CiphertextHandle(rand::random())).collect();
    let proof = InputProof(rand::random::<[u8; PROOF_LEN]>().to_vec());

    let _writer = state.writer.lock().await;
    let mut tx = state.db.begin().await.map_err(internal)?;
    for (handle, v) in handles.iter().zip(&req.values) {
        db::insert_ciphertext(&mut *tx, handle, v.width, v.value).await?;
    }
    db::insert_proof(&mut *tx, &proof, &req.contract, &req.submitter, &handles).await?;
    tx.commit().await.map_err(internal)?;

    debug!(contract = %req.contract, submitter = %req.submitter, values = handles.len(), "input encrypted");
    Ok(EncryptResponse { handles, proof })
}
