//! Wallet keys and transaction signing
//!
//! The pipeline only depends on the [`Signer`] trait. The bundled
//! [`Ed25519Signer`] loads account keys from an environment variable or a
//! PEM keystore file, the same way the wallet configuration is resolved for
//! every account in a run.

pub mod bech32;
pub mod keystore;

use crate::config::WalletConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::Address;

use ed25519_dalek::{Signer as _, SigningKey};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Produces signatures on behalf of one account
pub trait Signer: Send + Sync {
    /// Address derived from the signing key
    fn address(&self) -> &Address;

    /// Sign an opaque payload
    fn sign(&self, payload: &[u8]) -> OrchestratorResult<Vec<u8>>;
}

/// Ed25519 account key
pub struct Ed25519Signer {
    key: SigningKey,
    address: Address,
}

impl Ed25519Signer {
    /// Create a signer from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(seed);
        let address = Address::new(bech32::encode_address(&key.verifying_key().to_bytes()));
        Self { key, address }
    }

    /// Create a signer from a hex encoded seed
    pub fn from_hex(seed_hex: &str) -> OrchestratorResult<Self> {
        let bytes = hex::decode(seed_hex.trim().trim_start_matches("0x"))
            .map_err(|e| OrchestratorError::Keystore(format!("Invalid private key: {}", e)))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            OrchestratorError::Keystore(format!(
                "Private key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_seed(&seed))
    }

    /// Load a signer from a wallet PEM file
    pub fn from_pem_file(path: &Path) -> OrchestratorResult<Self> {
        let pem = keystore::load_pem_file(path)?;
        let signer = Self::from_seed(&pem.seed);

        if let Some(declared) = pem.declared_address {
            if declared != signer.address.as_str() {
                return Err(OrchestratorError::Keystore(format!(
                    "{} declares {} but the key derives {}",
                    path.display(),
                    declared,
                    signer.address
                )));
            }
        }

        debug!("Loaded wallet {} from {}", signer.address, path.display());
        Ok(signer)
    }

    /// Load a signer from wallet configuration.
    ///
    /// The environment variable wins over the keystore file when both are set.
    pub fn from_config(config: &WalletConfig) -> OrchestratorResult<Self> {
        if let Some(var) = &config.private_key_env {
            if let Ok(key) = std::env::var(var) {
                return Self::from_hex(&key);
            }
        }

        if let Some(path) = &config.keystore_path {
            return Self::from_pem_file(Path::new(path));
        }

        Err(OrchestratorError::Keystore(
            "No wallet configured. Set private_key_env or keystore_path".to_string(),
        ))
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> &Address {
        &self.address
    }

    fn sign(&self, payload: &[u8]) -> OrchestratorResult<Vec<u8>> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }
}

/// Signers indexed by the address they sign for
#[derive(Default, Clone)]
pub struct Keyring {
    signers: HashMap<Address, Arc<dyn Signer>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signer; returns its address
    pub fn insert(&mut self, signer: Arc<dyn Signer>) -> Address {
        let address = signer.address().clone();
        info!("Registered signer for {}", address);
        self.signers.insert(address.clone(), signer);
        address
    }

    /// Signer for a sender, if one was registered
    pub fn get(&self, address: &Address) -> OrchestratorResult<Arc<dyn Signer>> {
        self.signers
            .get(address)
            .cloned()
            .ok_or_else(|| OrchestratorError::Signing {
                sender: address.to_string(),
                message: "No key loaded for sender".to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn test_signature_verifies_against_derived_key() {
        let signer = Ed25519Signer::from_seed(&[3u8; 32]);
        assert!(signer.address().as_str().starts_with("erd1"));

        let signature = signer.sign(b"payload").unwrap();
        let signature = Signature::from_slice(&signature).unwrap();
        assert!(signer.key.verifying_key().verify(b"payload", &signature).is_ok());
    }

    #[test]
    fn test_pem_address_mismatch_rejected() {
        let signer = Ed25519Signer::from_seed(&[5u8; 32]);
        let public_key = signer.key.verifying_key().to_bytes();
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.pem");
        std::fs::write(
            &good,
            keystore::to_pem(signer.address().as_str(), &[5u8; 32], &public_key),
        )
        .unwrap();
        assert_eq!(
            Ed25519Signer::from_pem_file(&good).unwrap().address(),
            signer.address()
        );

        let bad = dir.path().join("bad.pem");
        std::fs::write(&bad, keystore::to_pem("erd1other", &[5u8; 32], &public_key)).unwrap();
        assert!(Ed25519Signer::from_pem_file(&bad).is_err());
    }

    #[test]
    fn test_keyring_missing_sender_is_signing_error() {
        let keyring = Keyring::new();
        let result = keyring.get(&Address::new("erd1nobody"));
        assert!(matches!(result, Err(OrchestratorError::Signing { .. })));
    }

    #[test]
    fn test_hex_seed_length_checked() {
        assert!(Ed25519Signer::from_hex("abcd").is_err());
        assert!(Ed25519Signer::from_hex(&"11".repeat(32)).is_ok());
    }
}
