use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{InsertUserError, Item, NewItem, NewUser, PurchasedItem, Store, User};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    password_hash: String,
    role: String,
    refresh_token: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            phone: r.phone,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            refresh_token: r.refresh_token,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    book_name: String,
    author: String,
    category: String,
    stock: i32,
    price: i64,
}

impl From<ItemRow> for Item {
    fn from(r: ItemRow) -> Self {
        Self {
            id: r.id,
            book_name: r.book_name,
            author: r.author,
            category: r.category,
            stock: r.stock,
            price: r.price,
        }
    }
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    item_id: Uuid,
    book_name: String,
    author: String,
    category: String,
    price: i64,
    purchased_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, phone, password_hash, role, \
                            refresh_token, created_at, updated_at";

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")
    }
}

fn unique_violation(err: sqlx::Error) -> InsertUserError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint().is_some_and(|c| c.contains("phone")) {
                InsertUserError::DuplicatePhone
            } else {
                InsertUserError::DuplicateEmail
            }
        }
        _ => InsertUserError::Store(anyhow::Error::new(err).context("insert user")),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn count_users_by_email(&self, email: &str) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.db)
            .await
            .context("count users by email")?;
        Ok(count)
    }

    async fn count_users_by_phone(&self, phone: &str) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_one(&self.db)
            .await
            .context("count users by phone")?;
        Ok(count)
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, InsertUserError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, phone, password_hash, role, refresh_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.refresh_token)
            .fetch_one(&self.db)
            .await
            .map_err(unique_violation)?;
        Ok(User::try_from(row)?)
    }

    async fn set_refresh_token(&self, user_id: Uuid, token: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(
            "UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.db)
        .await
        .context("store refresh token")?;
        Ok(res.rows_affected())
    }

    async fn find_item_by_category(&self, category: &str) -> anyhow::Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, book_name, author, category, stock, price FROM items WHERE category = $1",
        )
        .bind(category)
        .fetch_optional(&self.db)
        .await
        .context("find item by category")?;
        Ok(row.map(Item::from))
    }

    async fn find_available_item(&self, category: &str) -> anyhow::Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, book_name, author, category, stock, price
              FROM items
             WHERE category = $1 AND stock > 0
            "#,
        )
        .bind(category)
        .fetch_optional(&self.db)
        .await
        .context("find available item")?;
        Ok(row.map(Item::from))
    }

    async fn insert_item(&self, item: NewItem) -> anyhow::Result<Item> {
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            INSERT INTO items (id, book_name, author, category, stock, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (category) DO UPDATE SET stock = items.stock + 1
            RETURNING id, book_name, author, category, stock, price
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&item.book_name)
        .bind(&item.author)
        .bind(&item.category)
        .bind(item.stock)
        .bind(item.price)
        .fetch_one(&self.db)
        .await
        .context("insert item")?;
        Ok(row.into())
    }

    async fn increment_stock(&self, category: &str, by: i32) -> anyhow::Result<u64> {
        let res = sqlx::query("UPDATE items SET stock = stock + $2 WHERE category = $1")
            .bind(category)
            .bind(by)
            .execute(&self.db)
            .await
            .context("increment stock")?;
        Ok(res.rows_affected())
    }

    async fn decrement_available_stock(&self, category: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(
            "UPDATE items SET stock = stock - 1 WHERE category = $1 AND stock > 0",
        )
        .bind(category)
        .execute(&self.db)
        .await
        .context("decrement stock")?;
        Ok(res.rows_affected())
    }

    async fn append_purchase(&self, user_id: Uuid, item: PurchasedItem) -> anyhow::Result<u64> {
        // Selecting from users makes the insert a no-op for an unknown buyer.
        let res = sqlx::query(
            r#"
            INSERT INTO purchases (id, user_id, item_id, book_name, author, category, price, purchased_at)
            SELECT $1, u.id, $3, $4, $5, $6, $7, $8
              FROM users u
             WHERE u.id = $2
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(item.item_id)
        .bind(&item.book_name)
        .bind(&item.author)
        .bind(&item.category)
        .bind(item.price)
        .bind(item.purchased_at)
        .execute(&self.db)
        .await
        .context("append purchase")?;
        Ok(res.rows_affected())
    }

    async fn list_purchases(&self, user_id: Uuid) -> anyhow::Result<Vec<PurchasedItem>> {
        let rows = sqlx::query_as::<_, PurchaseRow>(
            r#"
            SELECT item_id, book_name, author, category, price, purchased_at
              FROM purchases
             WHERE user_id = $1
             ORDER BY purchased_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("list purchases")?;
        Ok(rows
            .into_iter()
            .map(|r| PurchasedItem {
                item_id: r.item_id,
                book_name: r.book_name,
                author: r.author,
                category: r.category,
                price: r.price,
                purchased_at: r.purchased_at,
            })
            .collect())
    }
}
