//! Durable records and the store capability the services run against.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::Role;

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub role: Role,
    /// Last refresh token issued to this user.
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub role: Role,
    pub refresh_token: Option<String>,
}

/// Catalog entry; one per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub book_name: String,
    pub author: String,
    pub category: String,
    pub stock: i32,
    pub price: i64,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub book_name: String,
    pub author: String,
    pub category: String,
    pub stock: i32,
    pub price: i64,
}

/// Snapshot of an item appended to a buyer's purchase list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasedItem {
    pub item_id: Uuid,
    pub book_name: String,
    pub author: String,
    pub category: String,
    pub price: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub purchased_at: OffsetDateTime,
}

impl PurchasedItem {
    pub fn snapshot(item: &Item, at: OffsetDateTime) -> Self {
        Self {
            item_id: item.id,
            book_name: item.book_name.clone(),
            author: item.author.clone(),
            category: item.category.clone(),
            price: item.price,
            purchased_at: at,
        }
    }
}

/// Unique-key collision on a user insert, or any other store failure.
#[derive(Debug, Error)]
pub enum InsertUserError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("phone already registered")]
    DuplicatePhone,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Record-level operations. Writes report how many records they modified;
/// conditional writes evaluate their predicate atomically.
#[async_trait]
pub trait Store: Send + Sync {
    async fn count_users_by_email(&self, email: &str) -> anyhow::Result<i64>;
    async fn count_users_by_phone(&self, phone: &str) -> anyhow::Result<i64>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn insert_user(&self, user: NewUser) -> Result<User, InsertUserError>;
    async fn set_refresh_token(&self, user_id: Uuid, token: &str) -> anyhow::Result<u64>;

    async fn find_item_by_category(&self, category: &str) -> anyhow::Result<Option<Item>>;
    /// Item in `category` with stock > 0.
    async fn find_available_item(&self, category: &str) -> anyhow::Result<Option<Item>>;
    /// Inserts a record, or bumps stock by one if the category appeared meanwhile.
    async fn insert_item(&self, item: NewItem) -> anyhow::Result<Item>;
    async fn increment_stock(&self, category: &str, by: i32) -> anyhow::Result<u64>;
    /// `stock -= 1` where category matches and stock > 0.
    async fn decrement_available_stock(&self, category: &str) -> anyhow::Result<u64>;

    async fn append_purchase(&self, user_id: Uuid, item: PurchasedItem) -> anyhow::Result<u64>;
    async fn list_purchases(&self, user_id: Uuid) -> anyhow::Result<Vec<PurchasedItem>>;
}
