//! Hierarchical deterministic key derivation.
//!
//! BIP39 entropy → mnemonic → seed, BIP32 extended keys, BIP44 paths of the
//! form `m/44'/coin'/0'/0/index`. All curves here are secp256k1; the
//! per-chain address encoding lives in [`crate::crypto::address`].

use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};

/// Entropy for a 24-word mnemonic
const ENTROPY_BYTES: usize = 32;

/// BIP44 coin type for a chain name; unknown chains fall back to the EVM
/// coin type.
pub fn coin_type(chain: &str) -> u32 {
    match chain {
        "bitcoin" => 0,
        "ethereum" | "bsc" | "polygon" => 60,
        "tron" => 195,
        _ => 60,
    }
}

/// BIP44 external-chain derivation path for an address index
pub fn derivation_path(chain: &str, index: u32) -> String {
    format!("m/44'/{}'/0'/0/{}", coin_type(chain), index)
}

/// A derived secp256k1 key pair
pub struct HdKey {
    signing_key: SigningKey,
}

impl HdKey {
    /// Generate a fresh mnemonic and the BIP39 seed it encodes.
    ///
    /// The mnemonic is returned to the caller exactly once; only the seed is
    /// ever persisted (encrypted).
    pub fn generate_master() -> WalletResult<(String, Zeroizing<Vec<u8>>)> {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
        rand::thread_rng()
            .try_fill_bytes(&mut *entropy)
            .map_err(|e| WalletError::Internal(format!("failed to gather entropy: {e}")))?;

        let mnemonic = Mnemonic::from_entropy(&*entropy)
            .map_err(|e| WalletError::Internal(format!("mnemonic generation failed: {e}")))?;
        let seed = Zeroizing::new(mnemonic.to_seed("").to_vec());

        Ok((mnemonic.to_string(), seed))
    }

    /// Master public key (compressed SEC1, hex) for a seed
    pub fn master_public_key(seed: &[u8]) -> WalletResult<String> {
        let xprv = XPrv::new(seed)
            .map_err(|e| WalletError::Internal(format!("invalid master seed: {e}")))?;
        Ok(hex::encode(xprv.public_key().to_bytes()))
    }

    /// Derive the child key at `m/44'/coin'/0'/0/index` from a master seed
    pub fn derive(seed: &[u8], chain: &str, index: u32) -> WalletResult<Self> {
        let path: DerivationPath = derivation_path(chain, index)
            .parse()
            .map_err(|e| WalletError::Internal(format!("invalid derivation path: {e}")))?;

        let xprv = XPrv::derive_from_path(seed, &path)
            .map_err(|e| WalletError::Internal(format!("derivation failed: {e}")))?;

        Ok(Self {
            signing_key: xprv.private_key().clone(),
        })
    }

    /// Rebuild a key pair from a raw 32-byte private scalar
    pub fn from_private_bytes(bytes: &[u8]) -> WalletResult<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| WalletError::InvalidArgument("invalid private key bytes".to_string()))?;
        Ok(Self { signing_key })
    }

    /// Raw private scalar (32 bytes), zeroized on drop
    pub fn private_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Compressed SEC1 public key, hex-encoded
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_encoded_point(true).as_bytes())
    }

    /// Uncompressed SEC1 public key bytes (65 bytes, 0x04 prefix)
    pub fn public_key_uncompressed(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a 32-byte prehashed digest, returning r ‖ s ‖ v (65 bytes).
    ///
    /// The recovery byte follows the EVM convention (27 + id).
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> WalletResult<Vec<u8>> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| WalletError::SignatureFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(27 + recovery_id.to_byte());
        Ok(out)
    }
}
