use serde::{Deserialize, Serialize};

use crate::store::{Item, PurchasedItem};

fn default_stock() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(default)]
    pub book_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub category: String,
    /// Initial stock when the category is new; ignored otherwise.
    #[serde(default = "default_stock", alias = "totalCount", alias = "total_count")]
    pub stock: i32,
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemResponse {
    pub created: bool,
    pub item: Item,
}

#[derive(Debug, Deserialize)]
pub struct BuyItemRequest {
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub message: String,
    pub book: PurchasedItem,
}
