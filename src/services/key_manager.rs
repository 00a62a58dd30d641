//! Key manager: deterministic derivation, encrypt-at-rest, signing.
//!
//! The KEK never leaves this service and is never persisted. Plaintext key
//! material exists only transiently inside derivation and signing calls,
//! zeroized on drop.
//!
//! Signing against the same address is serialized through a per-address
//! async mutex so account-model chains cannot race on nonces; distinct
//! addresses sign in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use sha3::{Digest, Keccak256};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::crypto::address::derive_address;
use crate::crypto::{derivation_path, HdKey, Kek};
use crate::db::{with_conn, DbPool};
use crate::error::{WalletError, WalletResult};
use crate::models::audit_log::{action, module, NewAuditLog};
use crate::models::encrypted_key::{EncryptedKey, NewEncryptedKey, KEY_TYPE_DERIVED, KEY_TYPE_MASTER};
use crate::models::signature_request::SignatureRequest;
use crate::services::audit::AuditSink;

/// Reserved identity owning platform hot-wallet keys
pub const PLATFORM_USER_ID: i64 = 0;

pub struct KeyManager {
    pool: DbPool,
    kek: Kek,
    audit: AuditSink,
    /// Per-(chain, address) signing locks
    sign_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyManager {
    pub fn new(pool: DbPool, kek_secret: SecretString, audit: AuditSink) -> Self {
        Self {
            pool,
            kek: Kek::derive(&kek_secret),
            audit,
            sign_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create the master key for (user, chain).
    ///
    /// Returns the stored row and the mnemonic. The mnemonic is handed to
    /// the caller exactly once and never stored.
    pub async fn generate_master_key(
        &self,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<(EncryptedKey, String)> {
        let chain_owned = chain.to_string();
        let existing = with_conn(&self.pool, move |conn| {
            EncryptedKey::find_master(conn, user_id, &chain_owned)
        })
        .await?;
        if existing.is_some() {
            return Err(WalletError::AlreadyExists("master key"));
        }

        let (mnemonic, seed) = HdKey::generate_master()?;
        let public_key = HdKey::master_public_key(&seed)?;
        let encrypted_priv = self.kek.seal(&seed)?;

        let new_key = NewEncryptedKey {
            user_id,
            chain: chain.to_string(),
            public_key,
            encrypted_priv,
            key_type: KEY_TYPE_MASTER.to_string(),
            derivation_path: None,
            address: None,
        };
        let key = with_conn(&self.pool, move |conn| EncryptedKey::create(conn, new_key)).await?;

        tracing::info!(user_id, chain, "Master key generated");
        self.audit.log_async(NewAuditLog::success(
            user_id,
            module::KEY_MANAGER,
            action::CREATE,
            &key.id.to_string(),
            format!("master key created for chain {chain}"),
        ));

        Ok((key, mnemonic))
    }

    /// Derive the next address for (user, chain), creating the master key on
    /// first use.
    ///
    /// Returns (address, derivation_path).
    pub async fn generate_address(&self, user_id: i64, chain: &str) -> WalletResult<(String, String)> {
        let chain_owned = chain.to_string();
        let master = with_conn(&self.pool, move |conn| {
            EncryptedKey::find_master(conn, user_id, &chain_owned)
        })
        .await?;

        let master = match master {
            Some(master) => master,
            None => match self.generate_master_key(user_id, chain).await {
                Ok((key, _mnemonic)) => key,
                // a concurrent caller created it first; use theirs
                Err(WalletError::AlreadyExists(_)) => {
                    let chain_owned = chain.to_string();
                    with_conn(&self.pool, move |conn| {
                        EncryptedKey::find_master(conn, user_id, &chain_owned)
                    })
                    .await?
                    .ok_or(WalletError::NotFound("master key"))?
                }
                Err(e) => return Err(e),
            },
        };

        let seed = Zeroizing::new(self.kek.open(&master.encrypted_priv)?);

        let chain_owned = chain.to_string();
        let index = with_conn(&self.pool, move |conn| {
            EncryptedKey::next_derivation_index(conn, user_id, &chain_owned)
        })
        .await?;

        let derived = HdKey::derive(&seed, chain, index)?;
        let address = derive_address(chain, &derived.public_key_uncompressed())?;
        let path = derivation_path(chain, index);
        let encrypted_priv = self.kek.seal(&derived.private_bytes())?;

        let new_key = NewEncryptedKey {
            user_id,
            chain: chain.to_string(),
            public_key: derived.public_key_hex(),
            encrypted_priv,
            key_type: KEY_TYPE_DERIVED.to_string(),
            derivation_path: Some(path.clone()),
            address: Some(address.clone()),
        };
        with_conn(&self.pool, move |conn| EncryptedKey::create(conn, new_key)).await?;

        tracing::info!(user_id, chain, %address, %path, "Address generated");
        self.audit.log_async(NewAuditLog::success(
            user_id,
            module::KEY_MANAGER,
            action::CREATE,
            &address,
            format!("address derived at {path}"),
        ));

        Ok((address, path))
    }

    pub async fn get_key_by_address(
        &self,
        chain: &str,
        address: &str,
    ) -> WalletResult<EncryptedKey> {
        let chain = chain.to_string();
        let address = address.to_string();
        with_conn(&self.pool, move |conn| {
            EncryptedKey::find_by_address(conn, &chain, &address)
        })
        .await?
        .ok_or(WalletError::NotFound("key"))
    }

    /// Sign a payload with the key behind (chain, address).
    ///
    /// The payload is hashed with Keccak-256 and signed with a recoverable
    /// ECDSA signature (r ‖ s ‖ v, hex). Fails with `Forbidden` when the
    /// key belongs to a different user.
    pub async fn sign(
        &self,
        user_id: i64,
        chain: &str,
        address: &str,
        payload: &[u8],
    ) -> WalletResult<String> {
        let key = self.get_key_by_address(chain, address).await?;
        if key.user_id != user_id {
            return Err(WalletError::Forbidden(
                "key does not belong to caller".to_string(),
            ));
        }

        let lock = self.address_lock(chain, address).await;
        let _guard = lock.lock().await;

        let private_bytes = Zeroizing::new(self.kek.open(&key.encrypted_priv)?);
        let signing_key = HdKey::from_private_bytes(&private_bytes)?;

        let digest: [u8; 32] = Keccak256::digest(payload).into();
        let signature = signing_key.sign_prehash(&digest)?;

        tracing::info!(user_id, chain, %address, "Payload signed");
        self.audit.log_async(NewAuditLog::success(
            user_id,
            module::KEY_MANAGER,
            action::SIGN,
            address,
            format!("signed {} bytes on {chain}", payload.len()),
        ));

        Ok(hex::encode(signature))
    }

    /// Sign with a forensic trail: a Pending signature request row is
    /// committed before any signing happens, then moved to Signed or Failed.
    pub async fn sign_with_request_id(
        &self,
        request_id: &str,
        user_id: i64,
        chain: &str,
        address: &str,
        payload: &[u8],
    ) -> WalletResult<SignatureRequest> {
        let key = self.get_key_by_address(chain, address).await?;

        let raw_tx_hex = hex::encode(payload);
        let (request_id_owned, chain_owned) = (request_id.to_string(), chain.to_string());
        let key_id = key.id;
        let request = with_conn(&self.pool, move |conn| {
            SignatureRequest::create_pending(
                conn,
                &request_id_owned,
                user_id,
                key_id,
                &chain_owned,
                &raw_tx_hex,
            )
        })
        .await?;

        match self.sign(user_id, chain, address, payload).await {
            Ok(signature) => {
                let request_id_owned = request_id.to_string();
                let signature_owned = signature.clone();
                with_conn(&self.pool, move |conn| {
                    SignatureRequest::mark_signed(conn, &request_id_owned, &signature_owned)
                })
                .await?;

                let request_id_owned = request_id.to_string();
                with_conn(&self.pool, move |conn| {
                    SignatureRequest::find_by_request_id(conn, &request_id_owned)
                })
                .await?
                .ok_or(WalletError::NotFound("signature request"))
            }
            Err(e) => {
                let request_id_owned = request_id.to_string();
                let message = e.to_string();
                let update = with_conn(&self.pool, move |conn| {
                    SignatureRequest::mark_failed(conn, &request_id_owned, &message)
                })
                .await;
                if let Err(update_err) = update {
                    tracing::error!(request_id, "Failed to record signing failure: {update_err}");
                }

                self.audit.log_async(NewAuditLog::failure(
                    user_id,
                    module::KEY_MANAGER,
                    action::SIGN,
                    address,
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }

    pub async fn list_keys(&self, user_id: i64, chain: Option<&str>) -> WalletResult<Vec<EncryptedKey>> {
        let chain = chain.map(str::to_string);
        with_conn(&self.pool, move |conn| {
            EncryptedKey::list_by_user(conn, user_id, chain.as_deref())
        })
        .await
    }

    pub async fn list_signature_requests(
        &self,
        user_id: i64,
        limit: i64,
    ) -> WalletResult<Vec<SignatureRequest>> {
        with_conn(&self.pool, move |conn| {
            SignatureRequest::list_by_user(conn, user_id, limit)
        })
        .await
    }

    async fn address_lock(&self, chain: &str, address: &str) -> Arc<Mutex<()>> {
        let mut locks = self.sign_locks.lock().await;
        locks
            .entry(format!("{chain}:{address}"))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Fresh request id for a signature request
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};
    use crate::models::signature_request::SignStatus;

    fn test_manager() -> (tempfile::TempDir, KeyManager, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("keys.db").to_str().unwrap()).unwrap();
        let mut conn = pool.get().unwrap();
        run_migrations(&mut conn).unwrap();
        let audit = AuditSink::new(pool.clone());
        let manager = KeyManager::new(
            pool.clone(),
            SecretString::new("test-kek-secret".to_string()),
            audit,
        );
        (dir, manager, pool)
    }

    #[tokio::test]
    async fn test_generate_address_creates_master_once() {
        let (_dir, manager, pool) = test_manager();

        let (address_a, path_a) = manager.generate_address(1, "ethereum").await.unwrap();
        let (address_b, path_b) = manager.generate_address(1, "ethereum").await.unwrap();

        assert_ne!(address_a, address_b);
        assert_eq!(path_a, "m/44'/60'/0'/0/0");
        assert_eq!(path_b, "m/44'/60'/0'/0/1");

        // exactly one master row exists
        let conn = &mut pool.get().unwrap();
        let master = EncryptedKey::find_master(conn, 1, "ethereum").unwrap();
        assert!(master.is_some());
        assert!(manager.generate_master_key(1, "ethereum").await.is_err());
    }

    #[tokio::test]
    async fn test_addresses_unique_per_chain() {
        let (_dir, manager, _pool) = test_manager();

        let (eth, _) = manager.generate_address(1, "ethereum").await.unwrap();
        let (tron, _) = manager.generate_address(1, "tron").await.unwrap();
        assert!(eth.starts_with("0x"));
        assert!(tron.starts_with('T'));
    }

    #[tokio::test]
    async fn test_sign_unknown_address_fails() {
        let (_dir, manager, _pool) = test_manager();

        let result = manager.sign(1, "ethereum", "0xdeadbeef", b"payload").await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sign_foreign_key_forbidden() {
        let (_dir, manager, _pool) = test_manager();

        let (address, _) = manager.generate_address(1, "ethereum").await.unwrap();
        let result = manager.sign(2, "ethereum", &address, b"payload").await;
        assert!(matches!(result, Err(WalletError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_sign_produces_65_byte_signature() {
        let (_dir, manager, _pool) = test_manager();

        let (address, _) = manager.generate_address(1, "ethereum").await.unwrap();
        let signature = manager.sign(1, "ethereum", &address, b"raw tx bytes").await.unwrap();
        assert_eq!(hex::decode(&signature).unwrap().len(), 65);
    }

    #[tokio::test]
    async fn test_sign_with_request_id_records_trail() {
        let (_dir, manager, pool) = test_manager();

        let (address, _) = manager.generate_address(1, "ethereum").await.unwrap();
        let request_id = generate_request_id();
        let request = manager
            .sign_with_request_id(&request_id, 1, "ethereum", &address, b"raw tx")
            .await
            .unwrap();

        assert_eq!(request.status(), SignStatus::Signed);
        assert!(request.signed_tx.is_some());
        assert!(request.signed_at.is_some());

        let conn = &mut pool.get().unwrap();
        let row = SignatureRequest::find_by_request_id(conn, &request_id).unwrap().unwrap();
        assert_eq!(row.status(), SignStatus::Signed);
    }

    #[tokio::test]
    async fn test_sign_with_request_id_failure_is_recorded() {
        let (_dir, manager, pool) = test_manager();

        // key owned by user 1, signing attempted by user 2
        let (address, _) = manager.generate_address(1, "ethereum").await.unwrap();
        let request_id = generate_request_id();
        let result = manager
            .sign_with_request_id(&request_id, 2, "ethereum", &address, b"raw tx")
            .await;
        assert!(result.is_err());

        let conn = &mut pool.get().unwrap();
        let row = SignatureRequest::find_by_request_id(conn, &request_id).unwrap().unwrap();
        assert_eq!(row.status(), SignStatus::Failed);
        assert!(row.error_msg.is_some());
    }

    #[tokio::test]
    async fn test_same_address_signing_is_serialized() {
        let (_dir, manager, _pool) = test_manager();
        let manager = std::sync::Arc::new(manager);

        let (address, _) = manager.generate_address(1, "ethereum").await.unwrap();

        let mut handles = Vec::new();
        for i in 0u8..4 {
            let manager = manager.clone();
            let address = address.clone();
            handles.push(tokio::spawn(async move {
                manager.sign(1, "ethereum", &address, &[i]).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
