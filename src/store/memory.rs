use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{InsertUserError, Item, NewItem, NewUser, PurchasedItem, Store, User};

/// Process-local store. Every operation holds the lock for its whole
/// read-modify-write, which makes the conditional updates atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    items: HashMap<String, Item>, // keyed by category
    purchases: HashMap<Uuid, Vec<PurchasedItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn count_users_by_email(&self, email: &str) -> anyhow::Result<i64> {
        let inner = self.lock()?;
        Ok(inner.users.values().filter(|u| u.email == email).count() as i64)
    }

    async fn count_users_by_phone(&self, phone: &str) -> anyhow::Result<i64> {
        let inner = self.lock()?;
        Ok(inner.users.values().filter(|u| u.phone == phone).count() as i64)
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.lock()?;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, InsertUserError> {
        let mut inner = self.lock()?;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(InsertUserError::DuplicateEmail);
        }
        if inner.users.values().any(|u| u.phone == user.phone) {
            return Err(InsertUserError::DuplicatePhone);
        }
        let now = OffsetDateTime::now_utc();
        let record = User {
            id: Uuid::new_v4(),
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            phone: user.phone,
            password_hash: user.password_hash,
            role: user.role,
            refresh_token: user.refresh_token,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_refresh_token(&self, user_id: Uuid, token: &str) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.refresh_token = Some(token.to_string());
                user.updated_at = OffsetDateTime::now_utc();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_item_by_category(&self, category: &str) -> anyhow::Result<Option<Item>> {
        Ok(self.lock()?.items.get(category).cloned())
    }

    async fn find_available_item(&self, category: &str) -> anyhow::Result<Option<Item>> {
        let inner = self.lock()?;
        Ok(inner.items.get(category).filter(|i| i.stock > 0).cloned())
    }

    async fn insert_item(&self, item: NewItem) -> anyhow::Result<Item> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.items.get_mut(&item.category) {
            existing.stock += 1;
            return Ok(existing.clone());
        }
        let record = Item {
            id: Uuid::new_v4(),
            book_name: item.book_name,
            author: item.author,
            category: item.category,
            stock: item.stock,
            price: item.price,
        };
        inner.items.insert(record.category.clone(), record.clone());
        Ok(record)
    }

    async fn increment_stock(&self, category: &str, by: i32) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        match inner.items.get_mut(category) {
            Some(item) => {
                item.stock += by;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn decrement_available_stock(&self, category: &str) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        match inner.items.get_mut(category) {
            Some(item) if item.stock > 0 => {
                item.stock -= 1;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn append_purchase(&self, user_id: Uuid, item: PurchasedItem) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        if !inner.users.contains_key(&user_id) {
            return Ok(0);
        }
        inner.purchases.entry(user_id).or_default().push(item);
        Ok(1)
    }

    async fn list_purchases(&self, user_id: Uuid) -> anyhow::Result<Vec<PurchasedItem>> {
        let inner = self.lock()?;
        Ok(inner.purchases.get(&user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Role;

    fn new_item(category: &str, stock: i32) -> NewItem {
        NewItem {
            book_name: "Dune".into(),
            author: "Frank Herbert".into(),
            category: category.into(),
            stock,
            price: 20,
        }
    }

    #[tokio::test]
    async fn decrement_never_goes_below_zero() {
        let store = MemoryStore::new();
        store.insert_item(new_item("fiction", 1)).await.unwrap();
        assert_eq!(store.decrement_available_stock("fiction").await.unwrap(), 1);
        assert_eq!(store.decrement_available_stock("fiction").await.unwrap(), 0);
        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 0);
        assert!(store.find_available_item("fiction").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_insert_in_category_increments() {
        let store = MemoryStore::new();
        let first = store.insert_item(new_item("poetry", 3)).await.unwrap();
        let second = store.insert_item(new_item("poetry", 9)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.stock, 4);
    }

    #[tokio::test]
    async fn duplicate_email_or_phone_is_typed() {
        let store = MemoryStore::new();
        let user = NewUser {
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@x.com".into(),
            phone: "1".into(),
            password_hash: "h".into(),
            role: Role::Member,
            refresh_token: None,
        };
        store.insert_user(user.clone()).await.unwrap();
        let err = store.insert_user(user.clone()).await.unwrap_err();
        assert!(matches!(err, InsertUserError::DuplicateEmail));

        let same_phone = NewUser {
            email: "b@x.com".into(),
            ..user
        };
        let err = store.insert_user(same_phone).await.unwrap_err();
        assert!(matches!(err, InsertUserError::DuplicatePhone));
        assert_eq!(store.count_users_by_email("a@x.com").await.unwrap(), 1);
        assert_eq!(store.count_users_by_email("b@x.com").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_to_unknown_user_modifies_nothing() {
        let store = MemoryStore::new();
        let item = store.insert_item(new_item("fiction", 1)).await.unwrap();
        let snap = PurchasedItem::snapshot(&item, OffsetDateTime::now_utc());
        assert_eq!(store.append_purchase(Uuid::new_v4(), snap).await.unwrap(), 0);
    }
}
