//! Catalog maintenance and the purchase transfer.
//!
//! A purchase touches two records with no shared transaction: the item's
//! stock and the buyer's purchase list. It runs as a two-step saga; when the
//! second write does not land, the stock decrement is compensated.

use axum::http::StatusCode;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{AddItemRequest, PurchaseReceipt};
use crate::store::{Item, NewItem, PurchasedItem, Store};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("{0}")]
    InvalidItem(String),
    #[error("User cannot access this resource!")]
    Forbidden,
    #[error("No books registered in category {0:?}")]
    UnknownCategory(String),
    #[error("No books available in this category")]
    OutOfStock(String),
    #[error("Stock decrement did not apply: another purchase took the last copy")]
    InventoryRaceLost(String),
    #[error("Purchase could not be recorded for the buyer (stock restored: {compensated})")]
    OwnershipRecordFailed { category: String, compensated: bool },
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl InventoryError {
    pub fn status(&self) -> StatusCode {
        match self {
            InventoryError::InvalidItem(_)
            | InventoryError::OutOfStock(_)
            | InventoryError::InventoryRaceLost(_)
            | InventoryError::OwnershipRecordFailed { .. } => StatusCode::BAD_REQUEST,
            InventoryError::Forbidden => StatusCode::FORBIDDEN,
            InventoryError::UnknownCategory(_) => StatusCode::NOT_FOUND,
            InventoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn validate(req: &AddItemRequest) -> Result<(), InventoryError> {
    if req.category.trim().is_empty() {
        return Err(InventoryError::InvalidItem("category is required".into()));
    }
    if req.stock < 0 {
        return Err(InventoryError::InvalidItem("stock must not be negative".into()));
    }
    if req.price < 0 {
        return Err(InventoryError::InvalidItem("price must not be negative".into()));
    }
    Ok(())
}

/// Adds one copy to an existing category, or registers the category with
/// the requested stock. Returns the item and whether it was created.
#[instrument(skip(store, req), fields(category = %req.category))]
pub async fn add_item(
    store: &dyn Store,
    is_admin: bool,
    req: AddItemRequest,
) -> Result<(Item, bool), InventoryError> {
    if !is_admin {
        warn!("non-admin tried to add an item");
        return Err(InventoryError::Forbidden);
    }
    validate(&req)?;
    let category = req.category.trim().to_string();

    if store.increment_stock(&category, 1).await? > 0 {
        let item = store
            .find_item_by_category(&category)
            .await?
            .ok_or_else(|| anyhow::anyhow!("item {category:?} vanished after increment"))?;
        info!(stock = item.stock, "category restocked");
        return Ok((item, false));
    }

    let item = store
        .insert_item(NewItem {
            book_name: req.book_name,
            author: req.author,
            category,
            stock: req.stock,
            price: req.price,
        })
        .await?;
    info!(item_id = %item.id, stock = item.stock, "category registered");
    Ok((item, true))
}

/// Transfers one unit of `category` to `buyer`.
#[instrument(skip(store))]
pub async fn purchase(
    store: &dyn Store,
    category: &str,
    buyer: Uuid,
    now: OffsetDateTime,
) -> Result<PurchaseReceipt, InventoryError> {
    let category = category.trim();
    let item = match store.find_available_item(category).await? {
        Some(item) => item,
        None => {
            return Err(match store.find_item_by_category(category).await? {
                Some(_) => InventoryError::OutOfStock(category.to_string()),
                None => InventoryError::UnknownCategory(category.to_string()),
            })
        }
    };

    // The store re-checks stock > 0, so a concurrent buyer of the last copy
    // shows up here as zero records modified.
    if store.decrement_available_stock(category).await? == 0 {
        warn!("lost the race for the last copy");
        return Err(InventoryError::InventoryRaceLost(category.to_string()));
    }

    let snapshot = PurchasedItem::snapshot(&item, now);
    let recorded = match store.append_purchase(buyer, snapshot.clone()).await {
        Ok(n) => n > 0,
        Err(e) => {
            error!(error = %e, "append purchase failed");
            false
        }
    };
    if !recorded {
        let compensated = compensate(store, category, buyer).await;
        return Err(InventoryError::OwnershipRecordFailed {
            category: category.to_string(),
            compensated,
        });
    }

    info!(item_id = %item.id, "book bought");
    Ok(PurchaseReceipt {
        message: "Book bought successfully.".into(),
        book: snapshot,
    })
}

async fn compensate(store: &dyn Store, category: &str, buyer: Uuid) -> bool {
    match store.increment_stock(category, 1).await {
        Ok(n) if n > 0 => {
            warn!(category, %buyer, "purchase not recorded; stock restored");
            true
        }
        Ok(_) => {
            error!(category, %buyer, "purchase not recorded and item missing; stock not restored");
            false
        }
        Err(e) => {
            error!(error = %e, category, %buyer, "purchase not recorded; stock restore failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        auth::claims::Role,
        store::{InsertUserError, MemoryStore, NewUser, User},
    };

    fn add(category: &str, stock: i32) -> AddItemRequest {
        AddItemRequest {
            book_name: "Dune".into(),
            author: "Frank Herbert".into(),
            category: category.into(),
            stock,
            price: 25,
        }
    }

    async fn buyer(store: &dyn Store, email: &str) -> Uuid {
        store
            .insert_user(NewUser {
                first_name: "B".into(),
                last_name: "Uyer".into(),
                email: email.into(),
                phone: email.into(),
                password_hash: "x".into(),
                role: Role::Member,
                refresh_token: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn add_item_creates_then_increments() {
        let store = MemoryStore::new();
        let (item, created) = add_item(&store, true, add("fiction", 3)).await.unwrap();
        assert!(created);
        assert_eq!(item.stock, 3);

        let (again, created) = add_item(&store, true, add("fiction", 10)).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, item.id);
        assert_eq!(again.stock, 4);
    }

    #[tokio::test]
    async fn add_item_requires_admin_and_valid_input() {
        let store = MemoryStore::new();
        let err = add_item(&store, false, add("fiction", 1)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let err = add_item(&store, true, add("  ", 1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidItem(_)));
        let err = add_item(&store, true, add("fiction", -1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidItem(_)));
        assert!(store.find_item_by_category("fiction").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purchase_moves_one_unit_to_buyer() {
        let store = MemoryStore::new();
        add_item(&store, true, add("fiction", 1)).await.unwrap();
        let id = buyer(&store, "a@x.com").await;

        let receipt = purchase(&store, "fiction", id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(receipt.book.category, "fiction");

        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 0);
        let books = store.list_purchases(id).await.unwrap();
        assert_eq!(books.len(), 1);

        let err = purchase(&store, "fiction", id, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::OutOfStock(_)));
    }

    #[tokio::test]
    async fn unknown_category_is_distinguished() {
        let store = MemoryStore::new();
        let id = buyer(&store, "a@x.com").await;
        let err = purchase(&store, "poetry", id, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::UnknownCategory(_)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_of_last_copy() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        add_item(store.as_ref(), true, add("fiction", 1)).await.unwrap();
        let a = buyer(store.as_ref(), "a@x.com").await;
        let b = buyer(store.as_ref(), "b@x.com").await;

        let spawn = |who: Uuid| {
            let store = store.clone();
            tokio::spawn(async move {
                purchase(store.as_ref(), "fiction", who, OffsetDateTime::now_utc()).await
            })
        };
        let (ra, rb) = tokio::join!(spawn(a), spawn(b));
        let results = [ra.unwrap(), rb.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser,
            InventoryError::OutOfStock(_) | InventoryError::InventoryRaceLost(_)
        ));
        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 0);
    }

    /// Delegates to a memory store but can be told to fail the ownership
    /// write and the compensating increment.
    struct FlakyStore {
        inner: MemoryStore,
        fail_append: AtomicBool,
        fail_increment: AtomicBool,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn count_users_by_email(&self, email: &str) -> anyhow::Result<i64> {
            self.inner.count_users_by_email(email).await
        }
        async fn count_users_by_phone(&self, phone: &str) -> anyhow::Result<i64> {
            self.inner.count_users_by_phone(phone).await
        }
        async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            self.inner.find_user_by_email(email).await
        }
        async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            self.inner.find_user_by_id(id).await
        }
        async fn insert_user(&self, user: NewUser) -> Result<User, InsertUserError> {
            self.inner.insert_user(user).await
        }
        async fn set_refresh_token(&self, user_id: Uuid, token: &str) -> anyhow::Result<u64> {
            self.inner.set_refresh_token(user_id, token).await
        }
        async fn find_item_by_category(&self, category: &str) -> anyhow::Result<Option<Item>> {
            self.inner.find_item_by_category(category).await
        }
        async fn find_available_item(&self, category: &str) -> anyhow::Result<Option<Item>> {
            self.inner.find_available_item(category).await
        }
        async fn insert_item(&self, item: NewItem) -> anyhow::Result<Item> {
            self.inner.insert_item(item).await
        }
        async fn increment_stock(&self, category: &str, by: i32) -> anyhow::Result<u64> {
            if self.fail_increment.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.inner.increment_stock(category, by).await
        }
        async fn decrement_available_stock(&self, category: &str) -> anyhow::Result<u64> {
            self.inner.decrement_available_stock(category).await
        }
        async fn append_purchase(&self, user_id: Uuid, item: PurchasedItem) -> anyhow::Result<u64> {
            if self.fail_append.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            self.inner.append_purchase(user_id, item).await
        }
        async fn list_purchases(&self, user_id: Uuid) -> anyhow::Result<Vec<PurchasedItem>> {
            self.inner.list_purchases(user_id).await
        }
    }

    fn flaky() -> FlakyStore {
        FlakyStore {
            inner: MemoryStore::new(),
            fail_append: AtomicBool::new(false),
            fail_increment: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn failed_ownership_write_restores_stock() {
        let store = flaky();
        add_item(&store, true, add("fiction", 2)).await.unwrap();
        let id = buyer(&store, "a@x.com").await;
        store.fail_append.store(true, Ordering::SeqCst);

        let err = purchase(&store, "fiction", id, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::OwnershipRecordFailed { compensated: true, .. }
        ));
        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 2);
        assert!(store.list_purchases(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_compensation_is_reported() {
        let store = flaky();
        add_item(&store, true, add("fiction", 2)).await.unwrap();
        let id = buyer(&store, "a@x.com").await;
        store.fail_append.store(true, Ordering::SeqCst);
        store.fail_increment.store(true, Ordering::SeqCst);

        let err = purchase(&store, "fiction", id, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::OwnershipRecordFailed { compensated: false, .. }
        ));
        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 1);
    }

    #[tokio::test]
    async fn unknown_buyer_is_compensated() {
        let store = MemoryStore::new();
        add_item(&store, true, add("fiction", 1)).await.unwrap();
        let err = purchase(&store, "fiction", Uuid::new_v4(), OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::OwnershipRecordFailed { compensated: true, .. }
        ));
        let item = store.find_item_by_category("fiction").await.unwrap().unwrap();
        assert_eq!(item.stock, 1);
    }
}
