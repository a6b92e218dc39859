//! Postgres `MenuGateway` backend.
//!
//! Every mutating operation runs in one transaction: the affected scope rows
//! are read under `FOR UPDATE`, positions are recomputed in Rust through
//! `crate::ordering`, the rows are written back, and contiguity is verified
//! before commit. A failure at any point rolls the whole transaction back,
//! so concurrent operators can race at the transaction boundary (last write
//! wins) without ever observing a duplicated or missing position.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use crate::ordering::{self, OrderedMember};
use crate::security::MenuAuthorization;
use crate::utils::{naming, slugify};

use super::error::{is_unique_violation, MenuError};
use super::gateway::{
    require_exact_id_set, CreateCategory, CreateLabel, MenuGateway, OperatorId, UpdateCategory,
    UpdateLabel,
};
use super::models::{
    CategoryLabelEntry, CategoryProductRow, CategoryRow, LabelCategoryEntry, LabelCategoryRow,
    LabelRow, MenuCategory, MenuData, MenuLabel, MenuProduct, MenuSettings, ProductCategoryEntry,
    ProductRow,
};
use super::pool::DbPool;

const SETTING_MENU_ICON: &str = "product_menu_icon";
const SETTING_MENU_TEXT: &str = "product_menu_text";

pub struct PgMenuGateway {
    pool: DbPool,
    auth: MenuAuthorization,
    name_retry_max_attempts: u32,
}

impl PgMenuGateway {
    pub fn new(pool: DbPool, auth: MenuAuthorization, name_retry_max_attempts: u32) -> Self {
        Self {
            pool,
            auth,
            name_retry_max_attempts,
        }
    }

    /// Bootstrap the menu tables. Idempotent; invoked once at startup.
    pub async fn ensure_schema(&self) -> Result<(), MenuError> {
        let pool = self.pool.get_pool();

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS menu_labels (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                icon TEXT,
                position INT NOT NULL,
                is_visible BOOLEAN NOT NULL DEFAULT true,
                auto_order BOOLEAN NOT NULL DEFAULT false
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS menu_categories (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                position INT NOT NULL,
                is_visible BOOLEAN NOT NULL DEFAULT true
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS products (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                is_visible BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS menu_label_categories (
                label_id UUID NOT NULL REFERENCES menu_labels(id) ON DELETE CASCADE,
                category_id UUID NOT NULL REFERENCES menu_categories(id) ON DELETE CASCADE,
                position INT NOT NULL,
                attached_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (label_id, category_id)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS menu_category_products (
                product_id UUID NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                category_id UUID NOT NULL REFERENCES menu_categories(id) ON DELETE CASCADE,
                position INT NOT NULL,
                is_primary BOOLEAN NOT NULL DEFAULT false,
                attached_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (product_id, category_id)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS site_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_menu_label_categories_label
             ON menu_label_categories(label_id, position)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_menu_category_products_category
             ON menu_category_products(category_id, position)",
        )
        .execute(pool)
        .await?;

        debug!("Menu schema ensured");
        Ok(())
    }
}

// ---- scope loaders (all lock their rows for the transaction) ----

async fn load_labels(tx: &mut Transaction<'_, Postgres>) -> Result<Vec<LabelRow>, MenuError> {
    let rows = sqlx::query_as::<_, LabelRow>(
        "SELECT id, name, icon, position, is_visible, auto_order
         FROM menu_labels ORDER BY position FOR UPDATE",
    )
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

async fn load_categories(tx: &mut Transaction<'_, Postgres>) -> Result<Vec<CategoryRow>, MenuError> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, slug, position, is_visible
         FROM menu_categories ORDER BY position FOR UPDATE",
    )
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

async fn load_label_scope(
    tx: &mut Transaction<'_, Postgres>,
    label_id: Uuid,
) -> Result<Vec<LabelCategoryRow>, MenuError> {
    let rows = sqlx::query_as::<_, LabelCategoryRow>(
        "SELECT label_id, category_id, position, attached_at
         FROM menu_label_categories WHERE label_id = $1 ORDER BY position FOR UPDATE",
    )
    .bind(label_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

async fn load_category_scope(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
) -> Result<Vec<CategoryProductRow>, MenuError> {
    let rows = sqlx::query_as::<_, CategoryProductRow>(
        "SELECT product_id, category_id, position, is_primary, attached_at
         FROM menu_category_products WHERE category_id = $1 ORDER BY position FOR UPDATE",
    )
    .bind(category_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

async fn find_label(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<LabelRow, MenuError> {
    sqlx::query_as::<_, LabelRow>(
        "SELECT id, name, icon, position, is_visible, auto_order
         FROM menu_labels WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| MenuError::not_found("label", id))
}

async fn find_category(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<CategoryRow, MenuError> {
    sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, slug, position, is_visible
         FROM menu_categories WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| MenuError::not_found("category", id))
}

async fn find_product(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<ProductRow, MenuError> {
    sqlx::query_as::<_, ProductRow>(
        "SELECT id, name, slug, is_visible, created_at FROM products WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| MenuError::not_found("product", id))
}

// ---- scope writers ----

/// The last gate before commit: a scope that is about to be written must be
/// a contiguous zero-based permutation.
fn ensure_contiguous<T: OrderedMember>(scope: &[T], what: &str) -> Result<(), MenuError> {
    if ordering::is_contiguous(scope) {
        Ok(())
    } else {
        error!("Aborting transaction: {} would lose contiguity", what);
        Err(MenuError::Invariant(format!("{what} would lose contiguity")))
    }
}

async fn save_label_positions(
    tx: &mut Transaction<'_, Postgres>,
    labels: &[LabelRow],
) -> Result<(), MenuError> {
    ensure_contiguous(labels, "label list")?;
    for label in labels {
        sqlx::query("UPDATE menu_labels SET position = $2 WHERE id = $1")
            .bind(label.id)
            .bind(label.position)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn save_category_positions(
    tx: &mut Transaction<'_, Postgres>,
    categories: &[CategoryRow],
) -> Result<(), MenuError> {
    ensure_contiguous(categories, "category list")?;
    for category in categories {
        sqlx::query("UPDATE menu_categories SET position = $2 WHERE id = $1")
            .bind(category.id)
            .bind(category.position)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Replace a label's assignment rows with the recomputed scope.
async fn save_label_scope(
    tx: &mut Transaction<'_, Postgres>,
    label_id: Uuid,
    scope: &[LabelCategoryRow],
) -> Result<(), MenuError> {
    ensure_contiguous(scope, "label categories")?;
    sqlx::query("DELETE FROM menu_label_categories WHERE label_id = $1")
        .bind(label_id)
        .execute(&mut **tx)
        .await?;
    for row in scope {
        sqlx::query(
            "INSERT INTO menu_label_categories (label_id, category_id, position, attached_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(row.label_id)
        .bind(row.category_id)
        .bind(row.position)
        .bind(row.attached_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn save_category_scope(
    tx: &mut Transaction<'_, Postgres>,
    category_id: Uuid,
    scope: &[CategoryProductRow],
) -> Result<(), MenuError> {
    ensure_contiguous(scope, "category products")?;
    sqlx::query("DELETE FROM menu_category_products WHERE category_id = $1")
        .bind(category_id)
        .execute(&mut **tx)
        .await?;
    for row in scope {
        sqlx::query(
            "INSERT INTO menu_category_products
                (product_id, category_id, position, is_primary, attached_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(row.product_id)
        .bind(row.category_id)
        .bind(row.position)
        .bind(row.is_primary)
        .bind(row.attached_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Re-derive an auto-ordered label's category order from display names.
async fn resort_if_auto(
    tx: &mut Transaction<'_, Postgres>,
    label: &LabelRow,
) -> Result<(), MenuError> {
    if !label.auto_order {
        return Ok(());
    }

    #[derive(sqlx::FromRow)]
    struct NamedRow {
        label_id: Uuid,
        category_id: Uuid,
        position: i32,
        attached_at: chrono::DateTime<Utc>,
        category_name: String,
    }

    let rows = sqlx::query_as::<_, NamedRow>(
        "SELECT a.label_id, a.category_id, a.position, a.attached_at, c.name AS category_name
         FROM menu_label_categories a
         JOIN menu_categories c ON c.id = a.category_id
         WHERE a.label_id = $1 ORDER BY a.position FOR UPDATE OF a",
    )
    .bind(label.id)
    .fetch_all(&mut **tx)
    .await?;

    let mut scope: Vec<LabelCategoryRow> = Vec::with_capacity(rows.len());
    let mut names: Vec<(Uuid, String)> = Vec::with_capacity(rows.len());
    for row in rows {
        names.push((row.category_id, row.category_name));
        scope.push(LabelCategoryRow {
            label_id: row.label_id,
            category_id: row.category_id,
            position: row.position,
            attached_at: row.attached_at,
        });
    }

    ordering::sort_alphabetical(&mut scope, |row| {
        names
            .iter()
            .find(|(id, _)| *id == row.category_id)
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    });
    save_label_scope(tx, label.id, &scope).await
}

/// Append a category at the end of a label's list (used by create/update).
async fn append_to_label(
    tx: &mut Transaction<'_, Postgres>,
    label: &LabelRow,
    category_id: Uuid,
) -> Result<(), MenuError> {
    let mut scope = load_label_scope(tx, label.id).await?;
    let position = scope.len();
    ordering::insert_at(
        &mut scope,
        position,
        LabelCategoryRow {
            label_id: label.id,
            category_id,
            position: 0,
            attached_at: Utc::now(),
        },
    );
    save_label_scope(tx, label.id, &scope).await?;
    resort_if_auto(tx, label).await
}

async fn insert_category_tx(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    slug: &str,
    label_ids: &[Uuid],
) -> Result<Uuid, MenuError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MenuError::validation("name", "name is required"));
    }
    if slug.is_empty() {
        return Err(MenuError::validation("slug", "slug is required"));
    }

    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(position) FROM menu_categories")
            .fetch_one(&mut **tx)
            .await?;
    let id = Uuid::new_v4();

    let inserted = sqlx::query(
        "INSERT INTO menu_categories (id, name, slug, position, is_visible)
         VALUES ($1, $2, $3, $4, true)",
    )
    .bind(id)
    .bind(name)
    .bind(slug)
    .bind(max.unwrap_or(-1) + 1)
    .execute(&mut **tx)
    .await;

    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            return Err(MenuError::validation(
                "slug",
                format!("slug '{slug}' already in use"),
            ));
        }
        return Err(err.into());
    }

    let mut seen = Vec::new();
    for label_id in label_ids {
        if seen.contains(label_id) {
            continue;
        }
        seen.push(*label_id);
        let label = find_label(tx, *label_id).await?;
        append_to_label(tx, &label, id).await?;
    }

    Ok(id)
}

async fn slug_taken(
    tx: &mut Transaction<'_, Postgres>,
    slug: &str,
    excluding: Option<Uuid>,
) -> Result<bool, MenuError> {
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM menu_categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(matches!(existing, Some(id) if Some(id) != excluding))
}

// ---- snapshot assembly ----

async fn category_dto(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<MenuCategory, MenuError> {
    let category = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, slug, position, is_visible FROM menu_categories WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| MenuError::not_found("category", id))?;

    #[derive(sqlx::FromRow)]
    struct LabelEntryRow {
        id: Uuid,
        name: String,
        icon: Option<String>,
        position: i32,
    }

    let labels = sqlx::query_as::<_, LabelEntryRow>(
        "SELECT l.id, l.name, l.icon, a.position
         FROM menu_label_categories a
         JOIN menu_labels l ON l.id = a.label_id
         WHERE a.category_id = $1
         ORDER BY l.position",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?;

    let product_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM menu_category_products WHERE category_id = $1",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(MenuCategory {
        id: category.id,
        name: category.name,
        slug: category.slug,
        position: category.position,
        is_visible: category.is_visible,
        product_count: product_count as usize,
        labels: labels
            .into_iter()
            .map(|l| CategoryLabelEntry {
                id: l.id,
                name: l.name,
                icon: l.icon,
                position: l.position,
            })
            .collect(),
    })
}

async fn label_dto(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<MenuLabel, MenuError> {
    let label = find_label(tx, id).await?;

    #[derive(sqlx::FromRow)]
    struct CategoryEntryRow {
        id: Uuid,
        name: String,
        slug: String,
        position: i32,
        attached_at: chrono::DateTime<Utc>,
    }

    let categories = sqlx::query_as::<_, CategoryEntryRow>(
        "SELECT c.id, c.name, c.slug, a.position, a.attached_at
         FROM menu_label_categories a
         JOIN menu_categories c ON c.id = a.category_id
         WHERE a.label_id = $1
         ORDER BY a.position",
    )
    .bind(id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(MenuLabel {
        id: label.id,
        name: label.name,
        icon: label.icon,
        position: label.position,
        is_visible: label.is_visible,
        auto_order: label.auto_order,
        categories: categories
            .into_iter()
            .map(|c| LabelCategoryEntry {
                id: c.id,
                name: c.name,
                slug: c.slug,
                position: c.position,
                attached_at: c.attached_at,
            })
            .collect(),
    })
}

async fn read_settings(tx: &mut Transaction<'_, Postgres>) -> Result<MenuSettings, MenuError> {
    let defaults = MenuSettings::default();
    let icon: Option<String> =
        sqlx::query_scalar("SELECT value FROM site_settings WHERE key = $1")
            .bind(SETTING_MENU_ICON)
            .fetch_optional(&mut **tx)
            .await?;
    let text: Option<String> =
        sqlx::query_scalar("SELECT value FROM site_settings WHERE key = $1")
            .bind(SETTING_MENU_TEXT)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(MenuSettings {
        icon: icon.unwrap_or(defaults.icon),
        text: text.unwrap_or(defaults.text),
    })
}

#[async_trait]
impl MenuGateway for PgMenuGateway {
    async fn list_menu_data(&self) -> Result<MenuData, MenuError> {
        // Read-only transaction: one consistent snapshot.
        let mut tx = self.pool.get_pool().begin().await?;

        let label_rows = sqlx::query_as::<_, LabelRow>(
            "SELECT id, name, icon, position, is_visible, auto_order
             FROM menu_labels ORDER BY position",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut labels = Vec::with_capacity(label_rows.len());
        for label in &label_rows {
            labels.push(label_dto(&mut tx, label.id).await?);
        }

        let category_rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, slug, position, is_visible
             FROM menu_categories ORDER BY position",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut categories = Vec::with_capacity(category_rows.len());
        for category in &category_rows {
            categories.push(category_dto(&mut tx, category.id).await?);
        }

        let product_rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, slug, is_visible, created_at FROM products ORDER BY created_at",
        )
        .fetch_all(&mut *tx)
        .await?;

        let assignment_rows = sqlx::query_as::<_, CategoryProductRow>(
            "SELECT product_id, category_id, position, is_primary, attached_at
             FROM menu_category_products ORDER BY attached_at",
        )
        .fetch_all(&mut *tx)
        .await?;

        let products = product_rows
            .into_iter()
            .map(|p| {
                let entries: Vec<ProductCategoryEntry> = assignment_rows
                    .iter()
                    .filter(|row| row.product_id == p.id)
                    .map(|row| ProductCategoryEntry {
                        category_id: row.category_id,
                        position: row.position,
                        is_primary: row.is_primary,
                        attached_at: row.attached_at,
                    })
                    .collect();
                MenuProduct {
                    id: p.id,
                    name: p.name,
                    slug: p.slug,
                    is_visible: p.is_visible,
                    created_at: p.created_at,
                    categories: entries,
                }
            })
            .collect();

        let settings = read_settings(&mut tx).await?;
        tx.commit().await?;

        Ok(MenuData {
            labels,
            categories,
            products,
            settings,
        })
    }

    async fn menu_settings(&self) -> Result<MenuSettings, MenuError> {
        let mut tx = self.pool.get_pool().begin().await?;
        let settings = read_settings(&mut tx).await?;
        tx.commit().await?;
        Ok(settings)
    }

    async fn create_category(
        &self,
        operator: OperatorId,
        input: CreateCategory,
    ) -> Result<MenuCategory, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;
        let id = insert_category_tx(&mut tx, &input.name, &input.slug, &input.label_ids).await?;
        let dto = category_dto(&mut tx, id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn create_new_category(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<MenuCategory, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let mut created = None;
        for attempt in 0..self.name_retry_max_attempts {
            let name = naming::new_item_name("Category", attempt);
            let slug = slugify(&name);
            if slug_taken(&mut tx, &slug, None).await? {
                continue;
            }
            created = Some(insert_category_tx(&mut tx, &name, &slug, &label_ids).await?);
            break;
        }

        let id = created.ok_or_else(|| {
            MenuError::validation("name", "could not allocate a unique category name")
        })?;
        let dto = category_dto(&mut tx, id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn update_category(
        &self,
        operator: OperatorId,
        input: UpdateCategory,
    ) -> Result<MenuCategory, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let existing = find_category(&mut tx, input.id).await?;

        if let Some(name) = &input.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(MenuError::validation("name", "name cannot be empty"));
            }
            sqlx::query("UPDATE menu_categories SET name = $2 WHERE id = $1")
                .bind(input.id)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(slug) = &input.slug {
            if slug.is_empty() {
                return Err(MenuError::validation("slug", "slug cannot be empty"));
            }
            if slug_taken(&mut tx, slug, Some(input.id)).await? {
                return Err(MenuError::validation(
                    "slug",
                    format!("slug '{slug}' already in use"),
                ));
            }
            sqlx::query("UPDATE menu_categories SET slug = $2 WHERE id = $1")
                .bind(input.id)
                .bind(slug)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(visible) = input.is_visible {
            sqlx::query("UPDATE menu_categories SET is_visible = $2 WHERE id = $1")
                .bind(input.id)
                .bind(visible)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(label_ids) = &input.label_ids {
            let mut wanted: Vec<Uuid> = Vec::new();
            for label_id in label_ids {
                if !wanted.contains(label_id) {
                    find_label(&mut tx, *label_id).await?;
                    wanted.push(*label_id);
                }
            }

            let current: Vec<Uuid> = sqlx::query_scalar(
                "SELECT label_id FROM menu_label_categories WHERE category_id = $1",
            )
            .bind(input.id)
            .fetch_all(&mut *tx)
            .await?;

            for label_id in &current {
                if !wanted.contains(label_id) {
                    let label = find_label(&mut tx, *label_id).await?;
                    let mut scope = load_label_scope(&mut tx, *label_id).await?;
                    ordering::remove_and_compact(&mut scope, input.id);
                    save_label_scope(&mut tx, *label_id, &scope).await?;
                    resort_if_auto(&mut tx, &label).await?;
                }
            }
            for label_id in &wanted {
                if !current.contains(label_id) {
                    let label = find_label(&mut tx, *label_id).await?;
                    append_to_label(&mut tx, &label, input.id).await?;
                }
            }
        }

        // Renames can change the derived order of auto-sorted labels.
        if input.name.as_deref().is_some_and(|n| n.trim() != existing.name) {
            let affected: Vec<Uuid> = sqlx::query_scalar(
                "SELECT label_id FROM menu_label_categories WHERE category_id = $1",
            )
            .bind(input.id)
            .fetch_all(&mut *tx)
            .await?;
            for label_id in affected {
                let label = find_label(&mut tx, label_id).await?;
                resort_if_auto(&mut tx, &label).await?;
            }
        }

        let dto = category_dto(&mut tx, input.id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn delete_category(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_category(&mut tx, id).await?;

        let affected_labels: Vec<Uuid> = sqlx::query_scalar(
            "SELECT label_id FROM menu_label_categories WHERE category_id = $1",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let orphaned: Vec<Uuid> = sqlx::query_scalar(
            "SELECT product_id FROM menu_category_products
             WHERE category_id = $1 AND is_primary",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        // FK cascade removes the assignment rows.
        sqlx::query("DELETE FROM menu_categories WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for label_id in affected_labels {
            let mut scope = load_label_scope(&mut tx, label_id).await?;
            ordering::assign_sequential(&mut scope);
            save_label_scope(&mut tx, label_id, &scope).await?;
        }

        for product_id in orphaned {
            sqlx::query(
                "UPDATE menu_category_products SET is_primary = true
                 WHERE product_id = $1 AND category_id = (
                     SELECT category_id FROM menu_category_products
                     WHERE product_id = $1 ORDER BY position LIMIT 1
                 )",
            )
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        let mut categories = load_categories(&mut tx).await?;
        ordering::assign_sequential(&mut categories);
        save_category_positions(&mut tx, &categories).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clone_category(
        &self,
        operator: OperatorId,
        id: Uuid,
    ) -> Result<MenuCategory, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let original = find_category(&mut tx, id).await?;
        let base = naming::strip_copy_suffix(&original.name);

        let mut chosen = None;
        for attempt in 0..self.name_retry_max_attempts {
            let name = naming::clone_name(&base, attempt);
            let slug = slugify(&name);
            if !slug_taken(&mut tx, &slug, None).await? {
                chosen = Some((name, slug));
                break;
            }
        }
        let (name, slug) = chosen.ok_or_else(|| {
            MenuError::validation("name", "could not allocate a unique clone name")
        })?;

        let clone_id = Uuid::new_v4();
        let mut categories = load_categories(&mut tx).await?;
        ordering::insert_at(
            &mut categories,
            original.position as usize + 1,
            CategoryRow {
                id: clone_id,
                name: name.clone(),
                slug: slug.clone(),
                position: 0,
                is_visible: original.is_visible,
            },
        );
        sqlx::query(
            "INSERT INTO menu_categories (id, name, slug, position, is_visible)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(clone_id)
        .bind(&name)
        .bind(&slug)
        .bind(0)
        .bind(original.is_visible)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                MenuError::validation("slug", format!("slug '{slug}' already in use"))
            } else {
                err.into()
            }
        })?;
        save_category_positions(&mut tx, &categories).await?;

        // Mirror label memberships, landing right below the source.
        let memberships = sqlx::query_as::<_, LabelCategoryRow>(
            "SELECT label_id, category_id, position, attached_at
             FROM menu_label_categories WHERE category_id = $1",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        for membership in memberships {
            let label = find_label(&mut tx, membership.label_id).await?;
            let mut scope = load_label_scope(&mut tx, membership.label_id).await?;
            ordering::insert_at(
                &mut scope,
                membership.position as usize + 1,
                LabelCategoryRow {
                    label_id: membership.label_id,
                    category_id: clone_id,
                    position: 0,
                    attached_at: Utc::now(),
                },
            );
            save_label_scope(&mut tx, membership.label_id, &scope).await?;
            resort_if_auto(&mut tx, &label).await?;
        }

        // Mirror product assignments; clones never steal primary.
        sqlx::query(
            "INSERT INTO menu_category_products
                (product_id, category_id, position, is_primary, attached_at)
             SELECT product_id, $2, position, false, $3
             FROM menu_category_products WHERE category_id = $1",
        )
        .bind(id)
        .bind(clone_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let dto = category_dto(&mut tx, clone_id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn create_label(
        &self,
        operator: OperatorId,
        input: CreateLabel,
    ) -> Result<MenuLabel, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(MenuError::validation("name", "name is required"));
        }

        let mut labels = load_labels(&mut tx).await?;
        let position = match input.after_label_id {
            Some(after_id) => {
                let after = labels
                    .iter()
                    .find(|l| l.id == after_id)
                    .ok_or_else(|| MenuError::not_found("label", after_id))?;
                after.position as usize + 1
            }
            None => 0,
        };

        let id = Uuid::new_v4();
        ordering::insert_at(
            &mut labels,
            position,
            LabelRow {
                id,
                name: name.clone(),
                icon: input.icon.clone().filter(|icon| !icon.is_empty()),
                position: 0,
                is_visible: true,
                auto_order: false,
            },
        );

        let inserted = sqlx::query(
            "INSERT INTO menu_labels (id, name, icon, position, is_visible, auto_order)
             VALUES ($1, $2, $3, $4, true, false)",
        )
        .bind(id)
        .bind(&name)
        .bind(input.icon.clone().filter(|icon| !icon.is_empty()))
        .bind(0)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(MenuError::validation(
                    "name",
                    format!("label '{name}' already exists"),
                ));
            }
            return Err(err.into());
        }

        save_label_positions(&mut tx, &labels).await?;
        let dto = label_dto(&mut tx, id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn update_label(
        &self,
        operator: OperatorId,
        input: UpdateLabel,
    ) -> Result<MenuLabel, MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let label = find_label(&mut tx, input.id).await?;

        if let Some(name) = &input.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(MenuError::validation("name", "name cannot be empty"));
            }
            let renamed = sqlx::query("UPDATE menu_labels SET name = $2 WHERE id = $1")
                .bind(input.id)
                .bind(name)
                .execute(&mut *tx)
                .await;
            if let Err(err) = renamed {
                if is_unique_violation(&err) {
                    return Err(MenuError::validation(
                        "name",
                        format!("label '{name}' already exists"),
                    ));
                }
                return Err(err.into());
            }
        }
        if let Some(icon) = &input.icon {
            sqlx::query("UPDATE menu_labels SET icon = $2 WHERE id = $1")
                .bind(input.id)
                .bind(if icon.is_empty() { None } else { Some(icon.clone()) })
                .execute(&mut *tx)
                .await?;
        }
        if let Some(visible) = input.is_visible {
            sqlx::query("UPDATE menu_labels SET is_visible = $2 WHERE id = $1")
                .bind(input.id)
                .bind(visible)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(auto_order) = input.auto_order {
            sqlx::query("UPDATE menu_labels SET auto_order = $2 WHERE id = $1")
                .bind(input.id)
                .bind(auto_order)
                .execute(&mut *tx)
                .await?;
            if auto_order {
                let refreshed = LabelRow {
                    auto_order: true,
                    ..label.clone()
                };
                resort_if_auto(&mut tx, &refreshed).await?;
            }
        }

        let dto = label_dto(&mut tx, input.id).await?;
        tx.commit().await?;
        Ok(dto)
    }

    async fn delete_label(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_label(&mut tx, id).await?;

        // FK cascade removes the assignment rows.
        sqlx::query("DELETE FROM menu_labels WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let mut labels = load_labels(&mut tx).await?;
        ordering::assign_sequential(&mut labels);
        save_label_positions(&mut tx, &labels).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn attach_category_to_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let label = find_label(&mut tx, label_id).await?;
        find_category(&mut tx, category_id).await?;

        let mut scope = load_label_scope(&mut tx, label_id).await?;
        let already_member = scope.iter().any(|row| row.category_id == category_id);
        if already_member {
            ordering::reorder_to(&mut scope, category_id, 0);
        } else {
            ordering::insert_at(
                &mut scope,
                0,
                LabelCategoryRow {
                    label_id,
                    category_id,
                    position: 0,
                    attached_at: Utc::now(),
                },
            );
        }
        save_label_scope(&mut tx, label_id, &scope).await?;
        resort_if_auto(&mut tx, &label).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn detach_category_from_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_label(&mut tx, label_id).await?;

        let mut scope = load_label_scope(&mut tx, label_id).await?;
        if ordering::remove_and_compact(&mut scope, category_id).is_none() {
            return Err(MenuError::not_found("label assignment", category_id));
        }
        save_label_scope(&mut tx, label_id, &scope).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn reorder_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let label = find_label(&mut tx, label_id).await?;
        if label.auto_order {
            return Err(MenuError::validation(
                "label_id",
                "ordering is automatic for this label",
            ));
        }

        let mut scope = load_label_scope(&mut tx, label_id).await?;
        let current: Vec<Uuid> = scope.iter().map(|row| row.category_id).collect();
        require_exact_id_set(&category_ids, &current, "category_ids")?;

        for row in scope.iter_mut() {
            let idx = category_ids
                .iter()
                .position(|id| *id == row.category_id)
                .ok_or_else(|| {
                    MenuError::Invariant("label membership changed mid-transaction".into())
                })?;
            row.position = idx as i32;
        }
        scope.sort_by_key(|row| row.position);
        save_label_scope(&mut tx, label_id, &scope).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn reorder_labels(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let mut labels = load_labels(&mut tx).await?;
        let current: Vec<Uuid> = labels.iter().map(|l| l.id).collect();
        require_exact_id_set(&label_ids, &current, "label_ids")?;

        for label in labels.iter_mut() {
            let idx = label_ids
                .iter()
                .position(|id| *id == label.id)
                .ok_or_else(|| {
                    MenuError::Invariant("label list changed mid-transaction".into())
                })?;
            label.position = idx as i32;
        }
        labels.sort_by_key(|l| l.position);
        save_label_positions(&mut tx, &labels).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn auto_sort_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        let label = find_label(&mut tx, label_id).await?;
        // Explicit request sorts regardless of the auto_order flag.
        let forced = LabelRow {
            auto_order: true,
            ..label
        };
        resort_if_auto(&mut tx, &forced).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn attach_product_to_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_product(&mut tx, product_id).await?;
        find_category(&mut tx, category_id).await?;

        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM menu_category_products
             WHERE product_id = $1 AND category_id = $2",
        )
        .bind(product_id)
        .bind(category_id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_some() {
            return Ok(()); // idempotent
        }

        let attachments: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM menu_category_products WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut scope = load_category_scope(&mut tx, category_id).await?;
        let position = scope.len();
        ordering::insert_at(
            &mut scope,
            position,
            CategoryProductRow {
                product_id,
                category_id,
                position: 0,
                is_primary: attachments == 0,
                attached_at: Utc::now(),
            },
        );
        save_category_scope(&mut tx, category_id, &scope).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn detach_product_from_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_category(&mut tx, category_id).await?;

        let mut scope = load_category_scope(&mut tx, category_id).await?;
        let removed = ordering::remove_and_compact(&mut scope, product_id);
        let Some(removed) = removed else {
            return Ok(()); // already detached
        };
        save_category_scope(&mut tx, category_id, &scope).await?;

        if removed.is_primary {
            sqlx::query(
                "UPDATE menu_category_products SET is_primary = true
                 WHERE product_id = $1 AND category_id = (
                     SELECT category_id FROM menu_category_products
                     WHERE product_id = $1 ORDER BY position LIMIT 1
                 )",
            )
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reorder_products_in_category(
        &self,
        operator: OperatorId,
        category_id: Uuid,
        product_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.auth.require_mutate(operator).await?;
        let mut tx = self.pool.get_pool().begin().await?;

        find_category(&mut tx, category_id).await?;

        let mut scope = load_category_scope(&mut tx, category_id).await?;
        let current: Vec<Uuid> = scope.iter().map(|row| row.product_id).collect();
        require_exact_id_set(&product_ids, &current, "product_ids")?;

        for row in scope.iter_mut() {
            let idx = product_ids
                .iter()
                .position(|id| *id == row.product_id)
                .ok_or_else(|| {
                    MenuError::Invariant("category membership changed mid-transaction".into())
                })?;
            row.position = idx as i32;
        }
        scope.sort_by_key(|row| row.position);
        save_category_scope(&mut tx, category_id, &scope).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_menu_settings(
        &self,
        operator: OperatorId,
        settings: MenuSettings,
    ) -> Result<MenuSettings, MenuError> {
        self.auth.require_mutate(operator).await?;

        let icon = settings.icon.trim().to_string();
        let text = settings.text.trim().to_string();
        if icon.is_empty() {
            return Err(MenuError::validation("icon", "icon is required"));
        }
        if text.is_empty() {
            return Err(MenuError::validation("text", "text is required"));
        }

        let mut tx = self.pool.get_pool().begin().await?;
        for (key, value) in [(SETTING_MENU_ICON, &icon), (SETTING_MENU_TEXT, &text)] {
            sqlx::query(
                "INSERT INTO site_settings (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(MenuSettings { icon, text })
    }
}
