use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::error::MenuError;
use super::models::{MenuCategory, MenuData, MenuLabel, MenuSettings};

/// Integer operator id carried by the authenticated request headers.
/// Identity management itself belongs to the external auth collaborator.
pub type OperatorId = i64;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategory {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub label_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCategory {
    pub id: Uuid,
    pub name: Option<String>,
    pub slug: Option<String>,
    /// When present, replaces the category's full label membership:
    /// labels missing from the list are detached, new ones are appended at
    /// the end of their label's list, surviving assignments keep their
    /// positions.
    pub label_ids: Option<Vec<Uuid>>,
    pub is_visible: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLabel {
    pub name: String,
    pub icon: Option<String>,
    /// Insert immediately after this label; top of the list when omitted.
    pub after_label_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLabel {
    pub id: Uuid,
    pub name: Option<String>,
    /// `Some("")` clears the icon, `Some(name)` replaces it, `None` keeps it.
    pub icon: Option<String>,
    pub is_visible: Option<bool>,
    /// Enabling automatic ordering immediately re-sorts the label's
    /// categories alphabetically.
    pub auto_order: Option<bool>,
}

/// The sole write path to durable menu data.
///
/// Every mutating operation is one transaction: it checks the mutation
/// policy before touching storage, and either commits a fully contiguous
/// ordering in every affected scope or has no effect at all.
#[async_trait]
pub trait MenuGateway: Send + Sync {
    // ---- reads ----

    /// Full denormalized snapshot: ordered labels with their ordered
    /// categories, the flat category list, the flat product list with
    /// per-category positions, and the menu settings.
    async fn list_menu_data(&self) -> Result<MenuData, MenuError>;

    async fn menu_settings(&self) -> Result<MenuSettings, MenuError>;

    // ---- categories ----

    async fn create_category(
        &self,
        operator: OperatorId,
        input: CreateCategory,
    ) -> Result<MenuCategory, MenuError>;

    /// Server-owned creation workflow: "New Category", "New Category (2)", …
    /// retried past name/slug collisions.
    async fn create_new_category(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<MenuCategory, MenuError>;

    async fn update_category(
        &self,
        operator: OperatorId,
        input: UpdateCategory,
    ) -> Result<MenuCategory, MenuError>;

    /// Removes the category, every label assignment and every product
    /// assignment, then compacts each affected scope.
    async fn delete_category(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError>;

    /// Deep copy (label memberships + product assignments), inserted right
    /// after the source in every scope, named by the copy-suffix convention.
    async fn clone_category(&self, operator: OperatorId, id: Uuid)
        -> Result<MenuCategory, MenuError>;

    // ---- labels ----

    async fn create_label(
        &self,
        operator: OperatorId,
        input: CreateLabel,
    ) -> Result<MenuLabel, MenuError>;

    async fn update_label(
        &self,
        operator: OperatorId,
        input: UpdateLabel,
    ) -> Result<MenuLabel, MenuError>;

    async fn delete_label(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError>;

    // ---- label membership & ordering ----

    /// Newest-first: the category lands at position 0 and every existing
    /// member shifts down by one. Re-attaching an existing member moves it
    /// to the top instead of duplicating it.
    async fn attach_category_to_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError>;

    async fn detach_category_from_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError>;

    /// Full-sequence rewrite: `category_ids` must match the label's current
    /// membership exactly or nothing is written.
    async fn reorder_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_ids: Vec<Uuid>,
    ) -> Result<(), MenuError>;

    /// Same contract at the top-level label list.
    async fn reorder_labels(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<(), MenuError>;

    /// Persist the alphabetical order for one label's categories.
    async fn auto_sort_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
    ) -> Result<(), MenuError>;

    // ---- product membership & ordering ----

    /// Appends at the end of the category; the product's first attachment
    /// anywhere becomes its primary category. Idempotent on repeat.
    async fn attach_product_to_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError>;

    async fn detach_product_from_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError>;

    async fn reorder_products_in_category(
        &self,
        operator: OperatorId,
        category_id: Uuid,
        product_ids: Vec<Uuid>,
    ) -> Result<(), MenuError>;

    // ---- settings ----

    async fn update_menu_settings(
        &self,
        operator: OperatorId,
        settings: MenuSettings,
    ) -> Result<MenuSettings, MenuError>;
}

/// Reorder payloads must name the current membership exactly: same ids,
/// no repeats, nothing missing.
pub(crate) fn require_exact_id_set(
    submitted: &[Uuid],
    current: &[Uuid],
    field: &'static str,
) -> Result<(), MenuError> {
    let mut submitted_sorted = submitted.to_vec();
    submitted_sorted.sort_unstable();
    submitted_sorted.dedup();
    if submitted_sorted.len() != submitted.len() {
        return Err(MenuError::validation(field, "duplicate ids in ordering"));
    }

    let mut current_sorted = current.to_vec();
    current_sorted.sort_unstable();
    if submitted_sorted != current_sorted {
        return Err(MenuError::validation(
            field,
            format!(
                "ordering of {} ids does not match the scope's {} members",
                submitted.len(),
                current.len()
            ),
        ));
    }
    Ok(())
}
