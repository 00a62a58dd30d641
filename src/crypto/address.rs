//! Per-chain address derivation and validation.
//!
//! EVM chains use the Keccak-256 form with an EIP-55 checksum. Tron wraps
//! the same hash with a 0x41 version byte and base58check. Bitcoin uses
//! legacy P2PKH over the compressed public key.

use ripemd::Ripemd160;
use sha2::{Digest as Sha2Digest, Sha256};
use sha3::{Digest as Sha3Digest, Keccak256};

use crate::error::{WalletError, WalletResult};

/// Tron mainnet address version byte
const TRON_VERSION: u8 = 0x41;

/// Bitcoin mainnet P2PKH version byte
const BTC_P2PKH_VERSION: u8 = 0x00;

/// Derive the on-chain address for a chain from an uncompressed SEC1 public
/// key (65 bytes, 0x04 prefix).
pub fn derive_address(chain: &str, uncompressed_pubkey: &[u8]) -> WalletResult<String> {
    match chain {
        "ethereum" | "bsc" | "polygon" => evm_address(uncompressed_pubkey),
        "tron" => tron_address(uncompressed_pubkey),
        "bitcoin" => bitcoin_p2pkh_address(uncompressed_pubkey),
        _ => evm_address(uncompressed_pubkey),
    }
}

/// Validate an address string for a chain
pub fn validate_address(chain: &str, address: &str) -> bool {
    match chain {
        "ethereum" | "bsc" | "polygon" => is_hex_address(address),
        "tron" => decode_tron_address(address).is_ok(),
        "bitcoin" => is_bitcoin_address(address),
        _ => is_hex_address(address),
    }
}

fn evm_address(uncompressed_pubkey: &[u8]) -> WalletResult<String> {
    let body = pubkey_body(uncompressed_pubkey)?;
    let hash = Keccak256::digest(body);
    Ok(to_checksum_address(&hash[12..]))
}

fn tron_address(uncompressed_pubkey: &[u8]) -> WalletResult<String> {
    let body = pubkey_body(uncompressed_pubkey)?;
    let hash = Keccak256::digest(body);

    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_VERSION);
    payload.extend_from_slice(&hash[12..]);

    Ok(bs58::encode(payload).with_check().into_string())
}

fn bitcoin_p2pkh_address(uncompressed_pubkey: &[u8]) -> WalletResult<String> {
    if uncompressed_pubkey.len() != 65 || uncompressed_pubkey[0] != 0x04 {
        return Err(WalletError::InvalidArgument(
            "expected uncompressed SEC1 public key".to_string(),
        ));
    }

    // hash160 over the compressed form, per modern P2PKH convention
    let compressed = compress_pubkey(uncompressed_pubkey);
    let sha = Sha256::digest(&compressed);
    let hash160 = Ripemd160::digest(sha);

    let mut payload = Vec::with_capacity(21);
    payload.push(BTC_P2PKH_VERSION);
    payload.extend_from_slice(&hash160);

    Ok(bs58::encode(payload).with_check().into_string())
}

/// Decode a Tron base58check address back to its 21-byte payload
pub fn decode_tron_address(address: &str) -> WalletResult<Vec<u8>> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| WalletError::InvalidArgument("invalid tron address".to_string()))?;

    if payload.len() != 21 || payload[0] != TRON_VERSION {
        return Err(WalletError::InvalidArgument("invalid tron address".to_string()));
    }
    Ok(payload)
}

fn pubkey_body(uncompressed_pubkey: &[u8]) -> WalletResult<&[u8]> {
    if uncompressed_pubkey.len() != 65 || uncompressed_pubkey[0] != 0x04 {
        return Err(WalletError::InvalidArgument(
            "expected uncompressed SEC1 public key".to_string(),
        ));
    }
    Ok(&uncompressed_pubkey[1..])
}

fn compress_pubkey(uncompressed: &[u8]) -> Vec<u8> {
    let x = &uncompressed[1..33];
    let y_is_odd = uncompressed[64] & 1 == 1;

    let mut out = Vec::with_capacity(33);
    out.push(if y_is_odd { 0x03 } else { 0x02 });
    out.extend_from_slice(x);
    out
}

/// EIP-55 mixed-case checksum encoding of a 20-byte address
fn to_checksum_address(bytes: &[u8]) -> String {
    let lower = hex::encode(bytes);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn is_hex_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_bitcoin_address(address: &str) -> bool {
    match bs58::decode(address).with_check(None).into_vec() {
        // P2PKH (0x00) or P2SH (0x05)
        Ok(payload) => payload.len() == 21 && (payload[0] == 0x00 || payload[0] == 0x05),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    /// The well-known address of private key 0x...01
    const KEY_ONE_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

    fn pubkey_for_scalar_one() -> Vec<u8> {
        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        let key = SigningKey::from_slice(&scalar).unwrap();
        key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
    }

    #[test]
    fn test_evm_address_known_vector() {
        let address = derive_address("ethereum", &pubkey_for_scalar_one()).unwrap();
        assert_eq!(address, KEY_ONE_ADDRESS);
    }

    #[test]
    fn test_evm_checksum_casing_validates() {
        let address = derive_address("ethereum", &pubkey_for_scalar_one()).unwrap();
        assert!(validate_address("ethereum", &address));
        // lowercased form still passes shape validation
        assert!(validate_address("ethereum", &address.to_lowercase()));
    }

    #[test]
    fn test_tron_address_round_trips_base58check() {
        let address = derive_address("tron", &pubkey_for_scalar_one()).unwrap();
        assert!(address.starts_with('T'));

        let payload = decode_tron_address(&address).unwrap();
        assert_eq!(payload.len(), 21);
        assert_eq!(payload[0], TRON_VERSION);
    }

    #[test]
    fn test_tron_rejects_corrupted_checksum() {
        let address = derive_address("tron", &pubkey_for_scalar_one()).unwrap();
        let mut corrupted = address.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'1' { b'2' } else { b'1' };
        let corrupted = String::from_utf8(corrupted).unwrap();

        assert!(!validate_address("tron", &corrupted));
    }

    #[test]
    fn test_bitcoin_address_shape() {
        let address = derive_address("bitcoin", &pubkey_for_scalar_one()).unwrap();
        assert!(address.starts_with('1'), "mainnet P2PKH starts with 1: {address}");
        assert!(validate_address("bitcoin", &address));
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        assert!(!validate_address("ethereum", "0x1234"));
        assert!(!validate_address("ethereum", "7E5F4552091A69125d5DfCb7b8C2659029395Bdf"));
        assert!(!validate_address("tron", "not-base58-0OIl"));
        assert!(!validate_address("bitcoin", "bc1qinvalid"));
    }

    #[test]
    fn test_rejects_compressed_pubkey_input() {
        let compressed = {
            let mut scalar = [0u8; 32];
            scalar[31] = 1;
            let key = SigningKey::from_slice(&scalar).unwrap();
            key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
        };
        assert!(derive_address("ethereum", &compressed).is_err());
    }
}
