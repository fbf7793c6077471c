//! Ed25519 signing identities for ledger transactions.
//!
//! A `SigningIdentity` is the capability that authorises ledger writes: it
//! owns one Ed25519 keypair, derives the ledger address from the public
//! key, and signs the canonical transaction payload.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sigil_core::{Address, SignedTransaction, Transaction, TransactionSigner};

use crate::error::{AttestationError, Result};

/// Ed25519 keypair bound to a ledger address.
#[derive(Clone)]
pub struct SigningIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl SigningIdentity {
    /// Creates an identity with a fresh random keypair.
    ///
    /// Backs `sigil identity --generate`; operators then load the printed
    /// key from configuration.
    pub fn ephemeral() -> Self {
        Self::from_bytes(&rand::random::<[u8; 32]>())
    }

    /// Creates an identity from 32 secret key bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        let address = Address::from_public_key(&verifying_key.to_bytes());

        Self { signing_key, verifying_key, address }
    }

    /// Parses a hex-encoded secret key, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::InvalidKeyFormat` if the input is not
    /// 64 hex characters.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let trimmed = secret_hex.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(raw)
            .map_err(|e| AttestationError::invalid_key_format(format!("signing key is not hex: {e}")))?;
        let secret: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            AttestationError::invalid_key_format(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self::from_bytes(&secret))
    }

    /// Ledger address of this identity.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Ed25519 public key in canonical 32-byte form.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Hex encoding of the secret key, for writing freshly generated keys
    /// to configuration.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .field("public_key", &hex::encode(self.verifying_key.to_bytes()))
            .finish_non_exhaustive()
    }
}

impl TransactionSigner for SigningIdentity {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, transaction: Transaction) -> SignedTransaction {
        let signature = self.signing_key.sign(&transaction.signing_payload());
        SignedTransaction {
            transaction,
            public_key: self.verifying_key.to_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use sigil_core::{AttestationDate, Digest, FingerprintKey, LedgerCall};

    use super::*;

    fn attest_tx(sender: Address) -> Transaction {
        Transaction::new(sender, 0, LedgerCall::Attest {
            fingerprint: FingerprintKey::from_label("project"),
            date: AttestationDate::from_ymd(2025, 8, 25).unwrap(),
            root: Digest::of(b"root"),
            batch_id: "build-7".to_string(),
        })
    }

    #[test]
    fn signatures_verify_for_own_address() {
        let identity = SigningIdentity::ephemeral();
        let signed = identity.sign(attest_tx(identity.address()));

        assert!(signed.verify());
        assert_eq!(signed.public_key, identity.public_key_bytes().to_vec());
    }

    #[test]
    fn hex_round_trip_preserves_address() {
        let identity = SigningIdentity::ephemeral();
        let restored = SigningIdentity::from_hex(&format!("0x{}", identity.secret_hex())).unwrap();

        assert_eq!(restored.address(), identity.address());
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            SigningIdentity::from_hex("zz"),
            Err(AttestationError::InvalidKeyFormat { .. })
        ));
        assert!(matches!(
            SigningIdentity::from_hex("abcd"),
            Err(AttestationError::InvalidKeyFormat { message }) if message.contains("32 bytes")
        ));
    }

    #[test]
    fn debug_hides_secret() {
        let identity = SigningIdentity::from_bytes(&[3u8; 32]);
        let shown = format!("{identity:?}");

        assert!(!shown.contains(&identity.secret_hex()));
        assert!(shown.contains("address"));
    }

    #[test]
    fn deterministic_from_bytes() {
        let a = SigningIdentity::from_bytes(&[1u8; 32]);
        let b = SigningIdentity::from_bytes(&[1u8; 32]);
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), SigningIdentity::from_bytes(&[2u8; 32]).address());
    }
}
