use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::ordering::OrderedMember;

/// A labeled group in the storefront menu. `position` orders labels globally.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LabelRow {
    pub id: Uuid,
    pub name: String,
    pub icon: Option<String>,
    pub position: i32,
    pub is_visible: bool,
    pub auto_order: bool,
}

/// A product category. `position` orders the flat category list,
/// independent of any label membership.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CategoryRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub position: i32,
    pub is_visible: bool,
}

/// Catalog product row. Read-only input: the gateway writes assignment rows,
/// never product rows.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
}

/// Membership of a category in a label, with its position inside that
/// label's list. A category can appear in several labels with a different
/// position in each.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LabelCategoryRow {
    pub label_id: Uuid,
    pub category_id: Uuid,
    pub position: i32,
    pub attached_at: DateTime<Utc>,
}

/// Membership of a product in a category. `attached_at` backs the default
/// chronological fallback ordering; `is_primary` marks the product's home
/// category.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CategoryProductRow {
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub position: i32,
    pub is_primary: bool,
    pub attached_at: DateTime<Utc>,
}

impl OrderedMember for LabelRow {
    fn id(&self) -> Uuid {
        self.id
    }
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

impl OrderedMember for CategoryRow {
    fn id(&self) -> Uuid {
        self.id
    }
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

// Within a label scope the member identity is the category.
impl OrderedMember for LabelCategoryRow {
    fn id(&self) -> Uuid {
        self.category_id
    }
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

// Within a category scope the member identity is the product.
impl OrderedMember for CategoryProductRow {
    fn id(&self) -> Uuid {
        self.product_id
    }
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

/// The storefront's top-level navigation entry for the menu
/// (persisted settings collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuSettings {
    pub icon: String,
    pub text: String,
}

impl Default for MenuSettings {
    fn default() -> Self {
        Self {
            icon: "Coffee".to_string(),
            text: "Blends".to_string(),
        }
    }
}

// ==================== DENORMALIZED READ MODEL ====================
// One consistent snapshot for the builder to seed from.

#[derive(Debug, Clone, Serialize)]
pub struct MenuData {
    pub labels: Vec<MenuLabel>,
    pub categories: Vec<MenuCategory>,
    pub products: Vec<MenuProduct>,
    pub settings: MenuSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuLabel {
    pub id: Uuid,
    pub name: String,
    pub icon: Option<String>,
    pub position: i32,
    pub is_visible: bool,
    pub auto_order: bool,
    pub categories: Vec<LabelCategoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelCategoryEntry {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub position: i32,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuCategory {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub position: i32,
    pub is_visible: bool,
    pub product_count: usize,
    pub labels: Vec<CategoryLabelEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryLabelEntry {
    pub id: Uuid,
    pub name: String,
    pub icon: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuProduct {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
    pub categories: Vec<ProductCategoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductCategoryEntry {
    pub category_id: Uuid,
    pub position: i32,
    pub is_primary: bool,
    pub attached_at: DateTime<Utc>,
}
