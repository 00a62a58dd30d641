//! Wallet and address records.
//!
//! A wallet groups a user's addresses; the key material itself lives in
//! `encrypted_keys` and never appears here.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::schema::{addresses, wallets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Hot,
    Cold,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Hot => "hot",
            WalletType::Cold => "cold",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cold" => WalletType::Cold,
            _ => WalletType::Hot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = wallets)]
pub struct Wallet {
    pub id: i64,
    pub uuid: String,
    pub user_id: i64,
    pub name: String,
    pub wallet_type: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = wallets)]
pub struct NewWallet {
    pub uuid: String,
    pub user_id: i64,
    pub name: String,
    pub wallet_type: String,
}

impl Wallet {
    pub fn create(
        conn: &mut SqliteConnection,
        user_id: i64,
        name: &str,
        wallet_type: WalletType,
    ) -> WalletResult<Wallet> {
        let new_wallet = NewWallet {
            uuid: uuid::Uuid::new_v4().to_string(),
            user_id,
            name: name.to_string(),
            wallet_type: wallet_type.as_str().to_string(),
        };
        diesel::insert_into(wallets::table).values(&new_wallet).execute(conn)?;

        let wallet = wallets::table
            .filter(wallets::uuid.eq(&new_wallet.uuid))
            .first(conn)?;
        Ok(wallet)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, wallet_id: i64) -> WalletResult<Option<Wallet>> {
        let wallet = wallets::table.find(wallet_id).first(conn).optional()?;
        Ok(wallet)
    }

    pub fn find_by_uuid(conn: &mut SqliteConnection, wallet_uuid: &str) -> WalletResult<Option<Wallet>> {
        let wallet = wallets::table
            .filter(wallets::uuid.eq(wallet_uuid))
            .first(conn)
            .optional()?;
        Ok(wallet)
    }

    pub fn list_by_user(conn: &mut SqliteConnection, user_id: i64) -> WalletResult<Vec<Wallet>> {
        let rows = wallets::table
            .filter(wallets::user_id.eq(user_id))
            .order(wallets::created_at.asc())
            .load(conn)?;
        Ok(rows)
    }

    pub fn wallet_type(&self) -> WalletType {
        WalletType::parse(&self.wallet_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = addresses)]
pub struct Address {
    pub id: i64,
    pub uuid: String,
    pub wallet_id: i64,
    pub user_id: i64,
    pub chain: String,
    pub address: String,
    pub label: String,
    pub derivation_path: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress {
    pub uuid: String,
    pub wallet_id: i64,
    pub user_id: i64,
    pub chain: String,
    pub address: String,
    pub label: String,
    pub derivation_path: String,
}

impl Address {
    pub fn create(conn: &mut SqliteConnection, new_address: NewAddress) -> WalletResult<Address> {
        diesel::insert_into(addresses::table)
            .values(&new_address)
            .execute(conn)?;

        let address = addresses::table
            .filter(addresses::uuid.eq(&new_address.uuid))
            .first(conn)?;
        Ok(address)
    }

    pub fn find_by_chain_address(
        conn: &mut SqliteConnection,
        chain: &str,
        address: &str,
    ) -> WalletResult<Option<Address>> {
        let row = addresses::table
            .filter(addresses::chain.eq(chain))
            .filter(addresses::address.eq(address))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn list_by_user_chain(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<Vec<Address>> {
        let rows = addresses::table
            .filter(addresses::user_id.eq(user_id))
            .filter(addresses::chain.eq(chain))
            .order(addresses::created_at.asc())
            .load(conn)?;
        Ok(rows)
    }
}
