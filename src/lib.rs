//! bookstore - account sessions and a small book inventory over HTTP.
//!
//! - Signed access/refresh session tokens with a bounded refresh exchange
//! - Purchase transfer between item stock and a buyer's purchase list
//! - Postgres (sqlx) or in-memory storage behind one `Store` trait

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod inventory;
pub mod state;
pub mod store;

pub use app::build_app;
pub use state::AppState;
