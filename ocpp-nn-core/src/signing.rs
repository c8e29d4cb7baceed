//! Signing policies
//!
//! A signing policy turns the encoded payload of an outgoing message into
//! zero or more signatures carried on the message. The cryptography behind
//! a policy is opaque to the dispatcher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signature attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub key_id: String,
    pub algorithm: String,
    /// Encoded signature value
    pub value: String,
}

/// The policy refused to sign
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signing rejected for {action}: {reason}")]
pub struct SigningError {
    pub action: String,
    pub reason: String,
}

impl SigningError {
    pub fn new(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Produces signatures for outgoing payloads
pub trait SigningPolicy: Send + Sync {
    /// Sign the encoded payload of a message for `action`
    fn sign(&self, action: &str, payload: &[u8]) -> Result<Vec<Signature>, SigningError>;
}

/// Policy that attaches no signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigning;

impl SigningPolicy for NoSigning {
    fn sign(&self, _action: &str, _payload: &[u8]) -> Result<Vec<Signature>, SigningError> {
        Ok(Vec::new())
    }
}

impl<F> SigningPolicy for F
where
    F: Fn(&str, &[u8]) -> Result<Vec<Signature>, SigningError> + Send + Sync,
{
    fn sign(&self, action: &str, payload: &[u8]) -> Result<Vec<Signature>, SigningError> {
        self(action, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_signing() {
        assert!(NoSigning.sign("Heartbeat", b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_closure_policy() {
        let policy = |action: &str, payload: &[u8]| {
            if payload.is_empty() {
                return Err(SigningError::new(action, "empty payload"));
            }
            Ok(vec![Signature {
                key_id: "station-key".to_string(),
                algorithm: "test".to_string(),
                value: format!("{}:{}", action, payload.len()),
            }])
        };

        let signatures = policy.sign("DataTransfer", b"abc").unwrap();
        assert_eq!(signatures[0].value, "DataTransfer:3");

        let err = policy.sign("DataTransfer", b"").unwrap_err();
        assert_eq!(err.reason, "empty payload");
    }

    #[test]
    fn test_signature_json_shape() {
        let signature = Signature {
            key_id: "k1".to_string(),
            algorithm: "ed25519".to_string(),
            value: "AAAA".to_string(),
        };
        let json = serde_json::to_value(&signature).unwrap();
        assert_eq!(json["keyId"], "k1");
    }
}
