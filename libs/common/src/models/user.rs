//! User model and its table declaration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::schema::{ColumnDef, ColumnType, Entity, TableDef};

/// User entity
///
/// `password` holds whatever credential representation the caller writes;
/// hashing is the auth layer's concern. It is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub username: String,
    pub email: Option<String>,
    pub birthday: Option<DateTime<Utc>>,
}

impl Entity for User {
    const TABLE: TableDef = TableDef {
        name: "users",
        columns: &[
            ColumnDef::new("id", ColumnType::BigSerial).primary_key(),
            ColumnDef::new("login", ColumnType::Text),
            ColumnDef::new("password", ColumnType::Text),
            ColumnDef::new("username", ColumnType::Text),
            ColumnDef::new("email", ColumnType::Text).nullable(),
            ColumnDef::new("birthday", ColumnType::TimestampTz).nullable(),
        ],
    };
}
