//! HMAC-SHA256 signed tokens.
//!
//! Two formats share one key:
//! * cookie tokens: `b64url(mac) "." b64url(payload)`
//! * payment external references: `{order_id}|{first 24 hex chars of mac(order_id)}`

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const REFERENCE_SIG_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("token is malformed")]
    Malformed,
    #[error("token encoding is invalid")]
    Encoding,
    #[error("signature mismatch")]
    Mismatch,
    #[error("signing key is empty")]
    EmptyKey,
}

impl From<SignatureError> for crate::errors::ServiceError {
    fn from(err: SignatureError) -> Self {
        crate::errors::ServiceError::InternalError(format!("signing: {}", err))
    }
}

/// Compares two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone)]
pub struct TokenSigner {
    mac: Arc<HmacSha256>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, SignatureError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SignatureError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(&key).map_err(|_| SignatureError::EmptyKey)?;
        Ok(Self { mac: Arc::new(mac) })
    }

    fn mac(&self) -> HmacSha256 {
        (*self.mac).clone()
    }

    fn digest(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(self.digest(payload)),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    /// Returns the payload when the MAC checks out.
    pub fn verify(&self, token: &str) -> Result<Vec<u8>, SignatureError> {
        let (sig_b64, payload_b64) = token.split_once('.').ok_or(SignatureError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SignatureError::Encoding)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SignatureError::Encoding)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::Mismatch)?;
        Ok(payload)
    }

    /// `{order_id}|{sig}` attached to gateway preferences.
    pub fn external_reference(&self, order_id: Uuid) -> String {
        let id = order_id.to_string();
        format!("{}|{}", id, self.reference_signature(&id))
    }

    fn reference_signature(&self, id: &str) -> String {
        let mut sig = hex::encode(self.digest(id.as_bytes()));
        sig.truncate(REFERENCE_SIG_LEN);
        sig
    }

    /// Recovers the order id from an external reference echoed by the gateway.
    pub fn verify_external_reference(&self, reference: &str) -> Option<Uuid> {
        let parts: Vec<&str> = reference.split('|').collect();
        if parts.len() != 2 {
            return None;
        }
        let (id, sig) = (parts[0], parts[1]);
        let expected = self.reference_signature(id);
        if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            return None;
        }
        Uuid::parse_str(id).ok()
    }
}
