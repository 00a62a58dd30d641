//! User identity rows.
//!
//! Created by auth onboarding; the custodial core only reads them.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::schema::users;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub uuid: String,
}

impl User {
    pub fn create(conn: &mut SqliteConnection) -> WalletResult<User> {
        let new_user = NewUser {
            uuid: uuid::Uuid::new_v4().to_string(),
        };
        diesel::insert_into(users::table).values(&new_user).execute(conn)?;

        let user = users::table
            .filter(users::uuid.eq(&new_user.uuid))
            .first(conn)?;
        Ok(user)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, user_id: i64) -> WalletResult<Option<User>> {
        let user = users::table.find(user_id).first(conn).optional()?;
        Ok(user)
    }
}
