//! Encrypted key storage.
//!
//! Two kinds of row: a master per (user, chain) holding the wrapped BIP32
//! seed, and one derived row per generated address holding the wrapped
//! private scalar. Rows are immutable after creation except for `status`.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::schema::encrypted_keys;

pub const KEY_TYPE_MASTER: &str = "master";
pub const KEY_TYPE_DERIVED: &str = "derived";

#[derive(Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = encrypted_keys)]
pub struct EncryptedKey {
    pub id: i64,
    pub user_id: i64,
    pub chain: String,
    pub public_key: String,
    /// AEAD-wrapped private material; never serialized out
    #[serde(skip_serializing)]
    pub encrypted_priv: String,
    pub key_type: String,
    pub derivation_path: Option<String>,
    pub address: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Debug impl that redacts the ciphertext
impl std::fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("chain", &self.chain)
            .field("key_type", &self.key_type)
            .field("derivation_path", &self.derivation_path)
            .field("address", &self.address)
            .field("encrypted_priv", &"<redacted>")
            .field("status", &self.status)
            .finish()
    }
}

#[derive(Clone, Insertable)]
#[diesel(table_name = encrypted_keys)]
pub struct NewEncryptedKey {
    pub user_id: i64,
    pub chain: String,
    pub public_key: String,
    pub encrypted_priv: String,
    pub key_type: String,
    pub derivation_path: Option<String>,
    pub address: Option<String>,
}

impl EncryptedKey {
    pub fn create(conn: &mut SqliteConnection, new_key: NewEncryptedKey) -> WalletResult<EncryptedKey> {
        diesel::insert_into(encrypted_keys::table)
            .values(&new_key)
            .execute(conn)?;

        let created = match &new_key.address {
            Some(address) => Self::find_by_address(conn, &new_key.chain, address)?,
            None => Self::find_master(conn, new_key.user_id, &new_key.chain)?,
        };
        created.ok_or(crate::error::WalletError::NotFound("encrypted key"))
    }

    pub fn find_by_id(conn: &mut SqliteConnection, key_id: i64) -> WalletResult<Option<EncryptedKey>> {
        let key = encrypted_keys::table.find(key_id).first(conn).optional()?;
        Ok(key)
    }

    /// The master key for (user, chain), if one exists
    pub fn find_master(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<Option<EncryptedKey>> {
        let key = encrypted_keys::table
            .filter(encrypted_keys::user_id.eq(user_id))
            .filter(encrypted_keys::chain.eq(chain))
            .filter(encrypted_keys::key_type.eq(KEY_TYPE_MASTER))
            .first(conn)
            .optional()?;
        Ok(key)
    }

    pub fn find_by_address(
        conn: &mut SqliteConnection,
        chain: &str,
        address: &str,
    ) -> WalletResult<Option<EncryptedKey>> {
        let key = encrypted_keys::table
            .filter(encrypted_keys::chain.eq(chain))
            .filter(encrypted_keys::address.eq(address))
            .first(conn)
            .optional()?;
        Ok(key)
    }

    /// Next unused derivation index for (user, chain).
    ///
    /// Indexes are allocated by counting persisted derived rows, so they are
    /// monotonic and never reused even after a key is disabled.
    pub fn next_derivation_index(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<u32> {
        let count: i64 = encrypted_keys::table
            .filter(encrypted_keys::user_id.eq(user_id))
            .filter(encrypted_keys::chain.eq(chain))
            .filter(encrypted_keys::key_type.eq(KEY_TYPE_DERIVED))
            .count()
            .get_result(conn)?;
        Ok(count as u32)
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: Option<&str>,
    ) -> WalletResult<Vec<EncryptedKey>> {
        let mut query = encrypted_keys::table
            .filter(encrypted_keys::user_id.eq(user_id))
            .into_boxed();
        if let Some(chain) = chain {
            query = query.filter(encrypted_keys::chain.eq(chain));
        }
        let rows = query.order(encrypted_keys::id.asc()).load(conn)?;
        Ok(rows)
    }
}
