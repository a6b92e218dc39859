//! In-memory `MenuGateway` backend.
//!
//! Holds the whole menu behind one `parking_lot::Mutex` and commits every
//! mutation copy-validate-swap: the operation runs against a cloned draft,
//! the draft's orderings are verified contiguous, and only then does the
//! draft replace the live state. A failed operation therefore has zero
//! effect, matching the transactional contract of the Postgres backend.
//!
//! Backs the test suite and local runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ordering::{self, OrderedMember};
use crate::security::MenuAuthorization;
use crate::utils::{naming, slugify};

use super::error::MenuError;
use super::gateway::{
    require_exact_id_set, CreateCategory, CreateLabel, MenuGateway, OperatorId, UpdateCategory,
    UpdateLabel,
};
use super::models::{
    CategoryLabelEntry, CategoryProductRow, CategoryRow, LabelCategoryEntry, LabelCategoryRow,
    LabelRow, MenuCategory, MenuData, MenuLabel, MenuProduct, MenuSettings, ProductCategoryEntry,
    ProductRow,
};

#[derive(Debug, Clone, Default)]
struct MenuState {
    labels: Vec<LabelRow>,
    categories: Vec<CategoryRow>,
    products: Vec<ProductRow>,
    label_categories: Vec<LabelCategoryRow>,
    category_products: Vec<CategoryProductRow>,
    settings: Option<MenuSettings>,
}

impl MenuState {
    fn label(&self, id: Uuid) -> Result<&LabelRow, MenuError> {
        self.labels
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| MenuError::not_found("label", id))
    }

    fn label_mut(&mut self, id: Uuid) -> Result<&mut LabelRow, MenuError> {
        self.labels
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| MenuError::not_found("label", id))
    }

    fn category(&self, id: Uuid) -> Result<&CategoryRow, MenuError> {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| MenuError::not_found("category", id))
    }

    fn category_mut(&mut self, id: Uuid) -> Result<&mut CategoryRow, MenuError> {
        self.categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| MenuError::not_found("category", id))
    }

    fn product(&self, id: Uuid) -> Result<&ProductRow, MenuError> {
        self.products
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| MenuError::not_found("product", id))
    }

    fn slug_taken(&self, slug: &str, excluding: Option<Uuid>) -> bool {
        self.categories
            .iter()
            .any(|c| c.slug == slug && Some(c.id) != excluding)
    }

    fn label_name_taken(&self, name: &str, excluding: Option<Uuid>) -> bool {
        self.labels
            .iter()
            .any(|l| l.name == name && Some(l.id) != excluding)
    }

    /// Pull one label's assignment rows out of the join table.
    fn take_label_scope(&mut self, label_id: Uuid) -> Vec<LabelCategoryRow> {
        let (mut scope, rest): (Vec<_>, Vec<_>) = self
            .label_categories
            .drain(..)
            .partition(|row| row.label_id == label_id);
        self.label_categories = rest;
        scope.sort_by_key(|row| row.position);
        scope
    }

    /// Pull one category's product assignment rows out of the join table.
    fn take_category_scope(&mut self, category_id: Uuid) -> Vec<CategoryProductRow> {
        let (mut scope, rest): (Vec<_>, Vec<_>) = self
            .category_products
            .drain(..)
            .partition(|row| row.category_id == category_id);
        self.category_products = rest;
        scope.sort_by_key(|row| row.position);
        scope
    }

    /// Auto-ordered labels re-derive their category order from names
    /// whenever membership changes.
    fn resort_if_auto(&mut self, label_id: Uuid) {
        let auto = self
            .labels
            .iter()
            .any(|l| l.id == label_id && l.auto_order);
        if !auto {
            return;
        }

        let names: HashMap<Uuid, String> = self
            .categories
            .iter()
            .map(|c| (c.id, c.name.clone()))
            .collect();

        let mut scope = self.take_label_scope(label_id);
        ordering::sort_alphabetical(&mut scope, |row| {
            names.get(&row.category_id).cloned().unwrap_or_default()
        });
        self.label_categories.extend(scope);
    }

    /// Append a category at the end of a label's list.
    fn append_to_label(&mut self, label_id: Uuid, category_id: Uuid) {
        let mut scope = self.take_label_scope(label_id);
        let position = scope.len();
        ordering::insert_at(
            &mut scope,
            position,
            LabelCategoryRow {
                label_id,
                category_id,
                position: 0,
                attached_at: Utc::now(),
            },
        );
        self.label_categories.extend(scope);
        self.resort_if_auto(label_id);
    }

    fn settings(&self) -> MenuSettings {
        self.settings.clone().unwrap_or_default()
    }

    /// Every scope must hold a contiguous zero-based permutation before a
    /// draft may replace the live state.
    fn verify_invariants(&self) -> Result<(), MenuError> {
        if !ordering::is_contiguous(&self.labels) {
            return Err(MenuError::Invariant("label list is not contiguous".into()));
        }
        if !ordering::is_contiguous(&self.categories) {
            return Err(MenuError::Invariant("category list is not contiguous".into()));
        }
        for label in &self.labels {
            let scope: Vec<&LabelCategoryRow> = self
                .label_categories
                .iter()
                .filter(|row| row.label_id == label.id)
                .collect();
            let positions: Vec<i32> = {
                let mut p: Vec<i32> = scope.iter().map(|row| row.position).collect();
                p.sort_unstable();
                p
            };
            if positions.iter().enumerate().any(|(idx, pos)| *pos != idx as i32) {
                return Err(MenuError::Invariant(format!(
                    "categories of label {} are not contiguous",
                    label.id
                )));
            }
        }
        for category in &self.categories {
            let mut positions: Vec<i32> = self
                .category_products
                .iter()
                .filter(|row| row.category_id == category.id)
                .map(|row| row.position)
                .collect();
            positions.sort_unstable();
            if positions.iter().enumerate().any(|(idx, pos)| *pos != idx as i32) {
                return Err(MenuError::Invariant(format!(
                    "products of category {} are not contiguous",
                    category.id
                )));
            }
        }
        Ok(())
    }

    fn label_dto(&self, id: Uuid) -> Result<MenuLabel, MenuError> {
        let label = self.label(id)?;
        let mut categories: Vec<LabelCategoryEntry> = self
            .label_categories
            .iter()
            .filter(|row| row.label_id == id)
            .filter_map(|row| {
                self.categories.iter().find(|c| c.id == row.category_id).map(|c| {
                    LabelCategoryEntry {
                        id: c.id,
                        name: c.name.clone(),
                        slug: c.slug.clone(),
                        position: row.position,
                        attached_at: row.attached_at,
                    }
                })
            })
            .collect();
        categories.sort_by_key(|entry| entry.position);

        Ok(MenuLabel {
            id: label.id,
            name: label.name.clone(),
            icon: label.icon.clone(),
            position: label.position,
            is_visible: label.is_visible,
            auto_order: label.auto_order,
            categories,
        })
    }

    fn category_dto(&self, id: Uuid) -> Result<MenuCategory, MenuError> {
        let category = self.category(id)?;
        let mut labels: Vec<(i32, CategoryLabelEntry)> = self
            .label_categories
            .iter()
            .filter(|row| row.category_id == id)
            .filter_map(|row| {
                self.labels.iter().find(|l| l.id == row.label_id).map(|l| {
                    (
                        l.position,
                        CategoryLabelEntry {
                            id: l.id,
                            name: l.name.clone(),
                            icon: l.icon.clone(),
                            position: row.position,
                        },
                    )
                })
            })
            .collect();
        labels.sort_by_key(|(label_position, _)| *label_position);

        Ok(MenuCategory {
            id: category.id,
            name: category.name.clone(),
            slug: category.slug.clone(),
            position: category.position,
            is_visible: category.is_visible,
            product_count: self
                .category_products
                .iter()
                .filter(|row| row.category_id == id)
                .count(),
            labels: labels.into_iter().map(|(_, entry)| entry).collect(),
        })
    }

    fn snapshot(&self) -> MenuData {
        let mut labels: Vec<MenuLabel> = self
            .labels
            .iter()
            .filter_map(|l| self.label_dto(l.id).ok())
            .collect();
        labels.sort_by_key(|l| l.position);

        let mut categories: Vec<MenuCategory> = self
            .categories
            .iter()
            .filter_map(|c| self.category_dto(c.id).ok())
            .collect();
        categories.sort_by_key(|c| c.position);

        let mut products: Vec<MenuProduct> = self
            .products
            .iter()
            .map(|p| {
                let mut entries: Vec<ProductCategoryEntry> = self
                    .category_products
                    .iter()
                    .filter(|row| row.product_id == p.id)
                    .map(|row| ProductCategoryEntry {
                        category_id: row.category_id,
                        position: row.position,
                        is_primary: row.is_primary,
                        attached_at: row.attached_at,
                    })
                    .collect();
                entries.sort_by_key(|e| e.attached_at);
                MenuProduct {
                    id: p.id,
                    name: p.name.clone(),
                    slug: p.slug.clone(),
                    is_visible: p.is_visible,
                    created_at: p.created_at,
                    categories: entries,
                }
            })
            .collect();
        products.sort_by_key(|p| p.created_at);

        MenuData {
            labels,
            categories,
            products,
            settings: self.settings(),
        }
    }
}

pub struct MemoryMenuGateway {
    auth: MenuAuthorization,
    name_retry_max_attempts: u32,
    state: Mutex<MenuState>,
}

impl MemoryMenuGateway {
    pub fn new(auth: MenuAuthorization) -> Self {
        Self {
            auth,
            name_retry_max_attempts: 50,
            state: Mutex::new(MenuState::default()),
        }
    }

    pub fn with_name_retry_budget(mut self, attempts: u32) -> Self {
        self.name_retry_max_attempts = attempts;
        self
    }

    /// Register a catalog product. The catalog is a read-only collaborator:
    /// the gateway itself never creates or edits product rows.
    pub fn seed_product(&self, product: ProductRow) {
        self.state.lock().products.push(product);
    }

    /// Authorize, run the operation on a cloned draft, verify contiguity,
    /// swap. Any error leaves the live state untouched.
    async fn mutate<R>(
        &self,
        operator: OperatorId,
        apply: impl FnOnce(&mut MenuState) -> Result<R, MenuError>,
    ) -> Result<R, MenuError> {
        self.auth.require_mutate(operator).await?;

        let mut guard = self.state.lock();
        let mut draft = guard.clone();
        let result = apply(&mut draft)?;
        draft.verify_invariants()?;
        *guard = draft;
        Ok(result)
    }
}

fn insert_category(
    state: &mut MenuState,
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
    if state.slug_taken(slug, None) {
        return Err(MenuError::validation("slug", format!("slug '{slug}' already in use")));
    }

    // New categories land at the end of the flat list.
    let id = Uuid::new_v4();
    let position = state.categories.len() as i32;
    state.categories.push(CategoryRow {
        id,
        name: name.to_string(),
        slug: slug.to_string(),
        position,
        is_visible: true,
    });

    let mut seen = Vec::new();
    for label_id in label_ids {
        if seen.contains(label_id) {
            continue;
        }
        seen.push(*label_id);
        state.label(*label_id)?;
        state.append_to_label(*label_id, id);
    }

    Ok(id)
}

#[async_trait]
impl MenuGateway for MemoryMenuGateway {
    async fn list_menu_data(&self) -> Result<MenuData, MenuError> {
        Ok(self.state.lock().snapshot())
    }

    async fn menu_settings(&self) -> Result<MenuSettings, MenuError> {
        Ok(self.state.lock().settings())
    }

    async fn create_category(
        &self,
        operator: OperatorId,
        input: CreateCategory,
    ) -> Result<MenuCategory, MenuError> {
        self.mutate(operator, |state| {
            let id = insert_category(state, &input.name, &input.slug, &input.label_ids)?;
            state.category_dto(id)
        })
        .await
    }

    async fn create_new_category(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<MenuCategory, MenuError> {
        let budget = self.name_retry_max_attempts;
        self.mutate(operator, move |state| {
            for attempt in 0..budget {
                let name = naming::new_item_name("Category", attempt);
                let slug = slugify(&name);
                if state.slug_taken(&slug, None) {
                    continue;
                }
                let id = insert_category(state, &name, &slug, &label_ids)?;
                return state.category_dto(id);
            }
            Err(MenuError::validation("name", "could not allocate a unique category name"))
        })
        .await
    }

    async fn update_category(
        &self,
        operator: OperatorId,
        input: UpdateCategory,
    ) -> Result<MenuCategory, MenuError> {
        self.mutate(operator, move |state| {
            state.category(input.id)?;

            if let Some(name) = &input.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(MenuError::validation("name", "name cannot be empty"));
                }
                state.category_mut(input.id)?.name = name.to_string();
            }
            if let Some(slug) = &input.slug {
                if slug.is_empty() {
                    return Err(MenuError::validation("slug", "slug cannot be empty"));
                }
                if state.slug_taken(slug, Some(input.id)) {
                    return Err(MenuError::validation(
                        "slug",
                        format!("slug '{slug}' already in use"),
                    ));
                }
                state.category_mut(input.id)?.slug = slug.clone();
            }
            if let Some(visible) = input.is_visible {
                state.category_mut(input.id)?.is_visible = visible;
            }

            if let Some(label_ids) = &input.label_ids {
                let mut wanted: Vec<Uuid> = Vec::new();
                for label_id in label_ids {
                    if !wanted.contains(label_id) {
                        state.label(*label_id)?;
                        wanted.push(*label_id);
                    }
                }

                let current: Vec<Uuid> = state
                    .label_categories
                    .iter()
                    .filter(|row| row.category_id == input.id)
                    .map(|row| row.label_id)
                    .collect();

                for label_id in &current {
                    if !wanted.contains(label_id) {
                        let mut scope = state.take_label_scope(*label_id);
                        ordering::remove_and_compact(&mut scope, input.id);
                        state.label_categories.extend(scope);
                        state.resort_if_auto(*label_id);
                    }
                }
                for label_id in &wanted {
                    if !current.contains(label_id) {
                        state.append_to_label(*label_id, input.id);
                    }
                }
            }

            // Renames can change the derived order of auto-sorted labels.
            if input.name.is_some() {
                let affected: Vec<Uuid> = state
                    .label_categories
                    .iter()
                    .filter(|row| row.category_id == input.id)
                    .map(|row| row.label_id)
                    .collect();
                for label_id in affected {
                    state.resort_if_auto(label_id);
                }
            }

            state.category_dto(input.id)
        })
        .await
    }

    async fn delete_category(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.category(id)?;

            let affected_labels: Vec<Uuid> = state
                .label_categories
                .iter()
                .filter(|row| row.category_id == id)
                .map(|row| row.label_id)
                .collect();
            for label_id in affected_labels {
                let mut scope = state.take_label_scope(label_id);
                ordering::remove_and_compact(&mut scope, id);
                state.label_categories.extend(scope);
            }

            // Products that had this category as primary get a new home.
            let orphaned: Vec<Uuid> = state
                .category_products
                .iter()
                .filter(|row| row.category_id == id && row.is_primary)
                .map(|row| row.product_id)
                .collect();
            state.category_products.retain(|row| row.category_id != id);
            for product_id in orphaned {
                promote_primary(state, product_id);
            }

            ordering::remove_and_compact(&mut state.categories, id);
            Ok(())
        })
        .await
    }

    async fn clone_category(
        &self,
        operator: OperatorId,
        id: Uuid,
    ) -> Result<MenuCategory, MenuError> {
        let budget = self.name_retry_max_attempts;
        self.mutate(operator, move |state| {
            let original = state.category(id)?.clone();
            let base = naming::strip_copy_suffix(&original.name);

            let (name, slug) = (0..budget)
                .map(|attempt| {
                    let name = naming::clone_name(&base, attempt);
                    let slug = slugify(&name);
                    (name, slug)
                })
                .find(|(_, slug)| !state.slug_taken(slug, None))
                .ok_or_else(|| {
                    MenuError::validation("name", "could not allocate a unique clone name")
                })?;

            let clone_id = Uuid::new_v4();
            let flat_position = original.position as usize + 1;
            ordering::insert_at(
                &mut state.categories,
                flat_position,
                CategoryRow {
                    id: clone_id,
                    name,
                    slug,
                    position: 0,
                    is_visible: original.is_visible,
                },
            );

            // Mirror label memberships, landing right below the source.
            let memberships: Vec<LabelCategoryRow> = state
                .label_categories
                .iter()
                .filter(|row| row.category_id == id)
                .cloned()
                .collect();
            for membership in memberships {
                let mut scope = state.take_label_scope(membership.label_id);
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
                state.label_categories.extend(scope);
                state.resort_if_auto(membership.label_id);
            }

            // Mirror product assignments; clones never steal primary.
            let assignments: Vec<CategoryProductRow> = state
                .category_products
                .iter()
                .filter(|row| row.category_id == id)
                .cloned()
                .collect();
            for assignment in assignments {
                state.category_products.push(CategoryProductRow {
                    product_id: assignment.product_id,
                    category_id: clone_id,
                    position: assignment.position,
                    is_primary: false,
                    attached_at: Utc::now(),
                });
            }

            state.category_dto(clone_id)
        })
        .await
    }

    async fn create_label(
        &self,
        operator: OperatorId,
        input: CreateLabel,
    ) -> Result<MenuLabel, MenuError> {
        self.mutate(operator, move |state| {
            let name = input.name.trim().to_string();
            if name.is_empty() {
                return Err(MenuError::validation("name", "name is required"));
            }
            if state.label_name_taken(&name, None) {
                return Err(MenuError::validation(
                    "name",
                    format!("label '{name}' already exists"),
                ));
            }

            let position = match input.after_label_id {
                Some(after_id) => state.label(after_id)?.position as usize + 1,
                None => 0,
            };

            let id = Uuid::new_v4();
            ordering::insert_at(
                &mut state.labels,
                position,
                LabelRow {
                    id,
                    name,
                    icon: input.icon.clone().filter(|icon| !icon.is_empty()),
                    position: 0,
                    is_visible: true,
                    auto_order: false,
                },
            );

            state.label_dto(id)
        })
        .await
    }

    async fn update_label(
        &self,
        operator: OperatorId,
        input: UpdateLabel,
    ) -> Result<MenuLabel, MenuError> {
        self.mutate(operator, move |state| {
            state.label(input.id)?;

            if let Some(name) = &input.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(MenuError::validation("name", "name cannot be empty"));
                }
                if state.label_name_taken(name, Some(input.id)) {
                    return Err(MenuError::validation(
                        "name",
                        format!("label '{name}' already exists"),
                    ));
                }
                state.label_mut(input.id)?.name = name.to_string();
            }
            if let Some(icon) = &input.icon {
                state.label_mut(input.id)?.icon =
                    if icon.is_empty() { None } else { Some(icon.clone()) };
            }
            if let Some(visible) = input.is_visible {
                state.label_mut(input.id)?.is_visible = visible;
            }
            if let Some(auto_order) = input.auto_order {
                state.label_mut(input.id)?.auto_order = auto_order;
                if auto_order {
                    state.resort_if_auto(input.id);
                }
            }

            state.label_dto(input.id)
        })
        .await
    }

    async fn delete_label(&self, operator: OperatorId, id: Uuid) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.label(id)?;
            state.label_categories.retain(|row| row.label_id != id);
            ordering::remove_and_compact(&mut state.labels, id);
            Ok(())
        })
        .await
    }

    async fn attach_category_to_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.label(label_id)?;
            state.category(category_id)?;

            let mut scope = state.take_label_scope(label_id);
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
            state.label_categories.extend(scope);
            state.resort_if_auto(label_id);
            Ok(())
        })
        .await
    }

    async fn detach_category_from_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.label(label_id)?;
            let mut scope = state.take_label_scope(label_id);
            let removed = ordering::remove_and_compact(&mut scope, category_id);
            state.label_categories.extend(scope);
            if removed.is_none() {
                return Err(MenuError::not_found("label assignment", category_id));
            }
            Ok(())
        })
        .await
    }

    async fn reorder_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
        category_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            let label = state.label(label_id)?;
            if label.auto_order {
                return Err(MenuError::validation(
                    "label_id",
                    "ordering is automatic for this label",
                ));
            }

            let mut scope = state.take_label_scope(label_id);
            let current: Vec<Uuid> = scope.iter().map(|row| row.category_id).collect();
            if let Err(err) = require_exact_id_set(&category_ids, &current, "category_ids") {
                state.label_categories.extend(scope);
                return Err(err);
            }

            apply_sequence(&mut scope, &category_ids);
            state.label_categories.extend(scope);
            Ok(())
        })
        .await
    }

    async fn reorder_labels(
        &self,
        operator: OperatorId,
        label_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            let current: Vec<Uuid> = state.labels.iter().map(|l| l.id).collect();
            require_exact_id_set(&label_ids, &current, "label_ids")?;
            apply_sequence(&mut state.labels, &label_ids);
            Ok(())
        })
        .await
    }

    async fn auto_sort_categories_in_label(
        &self,
        operator: OperatorId,
        label_id: Uuid,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.label(label_id)?;

            let names: HashMap<Uuid, String> = state
                .categories
                .iter()
                .map(|c| (c.id, c.name.clone()))
                .collect();
            let mut scope = state.take_label_scope(label_id);
            ordering::sort_alphabetical(&mut scope, |row| {
                names.get(&row.category_id).cloned().unwrap_or_default()
            });
            state.label_categories.extend(scope);
            Ok(())
        })
        .await
    }

    async fn attach_product_to_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.product(product_id)?;
            state.category(category_id)?;

            let exists = state
                .category_products
                .iter()
                .any(|row| row.product_id == product_id && row.category_id == category_id);
            if exists {
                return Ok(()); // idempotent
            }

            let is_primary = !state
                .category_products
                .iter()
                .any(|row| row.product_id == product_id);

            let mut scope = state.take_category_scope(category_id);
            let position = scope.len();
            ordering::insert_at(
                &mut scope,
                position,
                CategoryProductRow {
                    product_id,
                    category_id,
                    position: 0,
                    is_primary,
                    attached_at: Utc::now(),
                },
            );
            state.category_products.extend(scope);
            Ok(())
        })
        .await
    }

    async fn detach_product_from_category(
        &self,
        operator: OperatorId,
        product_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.category(category_id)?;

            let mut scope = state.take_category_scope(category_id);
            let removed = ordering::remove_and_compact(&mut scope, product_id);
            state.category_products.extend(scope);

            match removed {
                None => Ok(()), // already detached
                Some(row) => {
                    if row.is_primary {
                        promote_primary(state, product_id);
                    }
                    Ok(())
                }
            }
        })
        .await
    }

    async fn reorder_products_in_category(
        &self,
        operator: OperatorId,
        category_id: Uuid,
        product_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        self.mutate(operator, move |state| {
            state.category(category_id)?;

            let mut scope = state.take_category_scope(category_id);
            let current: Vec<Uuid> = scope.iter().map(|row| row.product_id).collect();
            if let Err(err) = require_exact_id_set(&product_ids, &current, "product_ids") {
                state.category_products.extend(scope);
                return Err(err);
            }

            apply_sequence(&mut scope, &product_ids);
            state.category_products.extend(scope);
            Ok(())
        })
        .await
    }

    async fn update_menu_settings(
        &self,
        operator: OperatorId,
        settings: MenuSettings,
    ) -> Result<MenuSettings, MenuError> {
        self.mutate(operator, move |state| {
            let icon = settings.icon.trim().to_string();
            let text = settings.text.trim().to_string();
            if icon.is_empty() {
                return Err(MenuError::validation("icon", "icon is required"));
            }
            if text.is_empty() {
                return Err(MenuError::validation("text", "text is required"));
            }
            let next = MenuSettings { icon, text };
            state.settings = Some(next.clone());
            Ok(next)
        })
        .await
    }
}

/// Rewrite a scope to the submitted id sequence (`position = index`).
/// Callers have already validated the id set.
fn apply_sequence<T: OrderedMember>(scope: &mut [T], sequence: &[Uuid]) {
    for row in scope.iter_mut() {
        if let Some(idx) = sequence.iter().position(|id| *id == row.id()) {
            row.set_position(idx as i32);
        }
    }
    scope.sort_by_key(OrderedMember::position);
}

/// Give a product whose primary assignment disappeared a new primary:
/// the lowest-positioned remaining assignment.
fn promote_primary(state: &mut MenuState, product_id: Uuid) {
    let next = state
        .category_products
        .iter()
        .filter(|row| row.product_id == product_id)
        .min_by_key(|row| row.position)
        .map(|row| (row.category_id, row.product_id));
    if let Some((category_id, product_id)) = next {
        for row in state.category_products.iter_mut() {
            if row.product_id == product_id && row.category_id == category_id {
                row.is_primary = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{MenuAuthorization, StaticPolicy};
    use std::sync::Arc;

    const OPERATOR: OperatorId = 7;

    fn gateway() -> MemoryMenuGateway {
        MemoryMenuGateway::new(MenuAuthorization::new(Arc::new(StaticPolicy::allow_all())))
    }

    async fn label(gw: &MemoryMenuGateway, name: &str) -> Uuid {
        gw.create_label(
            OPERATOR,
            CreateLabel {
                name: name.to_string(),
                icon: None,
                after_label_id: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn category(gw: &MemoryMenuGateway, name: &str, label_ids: Vec<Uuid>) -> Uuid {
        gw.create_category(
            OPERATOR,
            CreateCategory {
                name: name.to_string(),
                slug: slugify(name),
                label_ids,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn product(name: &str) -> ProductRow {
        ProductRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slugify(name),
            is_visible: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn created_category_lands_last_in_every_listed_label() {
        let gw = gateway();
        let lbl_a = label(&gw, "Drinks").await;
        let lbl_b = label(&gw, "Seasonal").await;
        category(&gw, "Filter", vec![lbl_a]).await;
        category(&gw, "Cold Brew", vec![lbl_a, lbl_b]).await;

        let espresso = gw
            .create_category(
                OPERATOR,
                CreateCategory {
                    name: "Espresso".to_string(),
                    slug: "espresso".to_string(),
                    label_ids: vec![lbl_a, lbl_b],
                },
            )
            .await
            .unwrap();

        let data = gw.list_menu_data().await.unwrap();
        for (label_id, expected_len) in [(lbl_a, 3), (lbl_b, 2)] {
            let label = data.labels.iter().find(|l| l.id == label_id).unwrap();
            assert_eq!(label.categories.len(), expected_len);
            let last = label.categories.last().unwrap();
            assert_eq!(last.id, espresso.id);
            assert_eq!(last.position as usize, expected_len - 1);
        }
    }

    #[tokio::test]
    async fn duplicate_slug_fails_without_mutating() {
        let gw = gateway();
        category(&gw, "Espresso", vec![]).await;

        let err = gw
            .create_category(
                OPERATOR,
                CreateCategory {
                    name: "Espresso Again".to_string(),
                    slug: "espresso".to_string(),
                    label_ids: vec![],
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MenuError::Validation { field: "slug", .. }));
        assert_eq!(gw.list_menu_data().await.unwrap().categories.len(), 1);
    }

    #[tokio::test]
    async fn attach_inserts_at_top_and_shifts_existing_members() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_a = category(&gw, "Filter", vec![lbl]).await;
        let cat_b = category(&gw, "Cold Brew", vec![lbl]).await;
        let cat_c = category(&gw, "Espresso", vec![]).await;

        gw.attach_category_to_label(OPERATOR, lbl, cat_c).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        let ids: Vec<Uuid> = members.iter().map(|c| c.id).collect();
        let positions: Vec<i32> = members.iter().map(|c| c.position).collect();
        assert_eq!(ids, vec![cat_c, cat_a, cat_b]);
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn reattaching_a_member_moves_it_to_the_top_without_duplicating() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_a = category(&gw, "Filter", vec![lbl]).await;
        let cat_b = category(&gw, "Cold Brew", vec![lbl]).await;

        gw.attach_category_to_label(OPERATOR, lbl, cat_b).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, cat_b);
        assert_eq!(members[1].id, cat_a);
    }

    #[tokio::test]
    async fn detach_compacts_the_remaining_members() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_x = category(&gw, "X Blend", vec![lbl]).await;
        let cat_y = category(&gw, "Y Blend", vec![lbl]).await;
        let cat_z = category(&gw, "Z Blend", vec![lbl]).await;

        gw.detach_category_from_label(OPERATOR, lbl, cat_y).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        let got: Vec<(Uuid, i32)> = members.iter().map(|c| (c.id, c.position)).collect();
        assert_eq!(got, vec![(cat_x, 0), (cat_z, 1)]);
    }

    #[tokio::test]
    async fn delete_category_compacts_every_affected_scope() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_x = category(&gw, "X Blend", vec![lbl]).await;
        let cat_y = category(&gw, "Y Blend", vec![lbl]).await;
        let cat_z = category(&gw, "Z Blend", vec![lbl]).await;

        gw.delete_category(OPERATOR, cat_y).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let flat: Vec<(Uuid, i32)> = data.categories.iter().map(|c| (c.id, c.position)).collect();
        assert_eq!(flat, vec![(cat_x, 0), (cat_z, 1)]);
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        let got: Vec<(Uuid, i32)> = members.iter().map(|c| (c.id, c.position)).collect();
        assert_eq!(got, vec![(cat_x, 0), (cat_z, 1)]);
    }

    #[tokio::test]
    async fn reorder_rejects_an_id_set_that_does_not_match_membership() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_a = category(&gw, "A Blend", vec![lbl]).await;
        let cat_b = category(&gw, "B Blend", vec![lbl]).await;
        let _cat_c = category(&gw, "C Blend", vec![lbl]).await;

        let err = gw
            .reorder_categories_in_label(OPERATOR, lbl, vec![cat_b, cat_a])
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::Validation { .. }));

        // Stored order is untouched.
        let data = gw.list_menu_data().await.unwrap();
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        let positions: Vec<i32> = members.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(members[0].id, cat_a);
    }

    #[tokio::test]
    async fn reorder_writes_the_submitted_sequence() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_a = category(&gw, "A Blend", vec![lbl]).await;
        let cat_b = category(&gw, "B Blend", vec![lbl]).await;
        let cat_c = category(&gw, "C Blend", vec![lbl]).await;

        gw.reorder_categories_in_label(OPERATOR, lbl, vec![cat_c, cat_a, cat_b])
            .await
            .unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let members = &data.labels.iter().find(|l| l.id == lbl).unwrap().categories;
        let ids: Vec<Uuid> = members.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![cat_c, cat_a, cat_b]);
    }

    #[tokio::test]
    async fn auto_order_labels_resort_on_membership_change() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let _zed = category(&gw, "Zed Blend", vec![lbl]).await;
        gw.update_label(
            OPERATOR,
            UpdateLabel {
                id: lbl,
                name: None,
                icon: None,
                is_visible: None,
                auto_order: Some(true),
            },
        )
        .await
        .unwrap();

        // Attach lands at the top of a manual label, but auto order wins here.
        let apple = category(&gw, "Apple Blend", vec![]).await;
        let mango = category(&gw, "Mango Blend", vec![]).await;
        gw.attach_category_to_label(OPERATOR, lbl, mango).await.unwrap();
        gw.attach_category_to_label(OPERATOR, lbl, apple).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let names: Vec<String> = data
            .labels
            .iter()
            .find(|l| l.id == lbl)
            .unwrap()
            .categories
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["Apple Blend", "Mango Blend", "Zed Blend"]);

        // Manual reorder is refused while auto order is on.
        let seq: Vec<Uuid> = data
            .labels
            .iter()
            .find(|l| l.id == lbl)
            .unwrap()
            .categories
            .iter()
            .map(|c| c.id)
            .collect();
        let err = gw
            .reorder_categories_in_label(OPERATOR, lbl, seq)
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::Validation { .. }));
    }

    #[tokio::test]
    async fn label_insert_after_places_the_label_below_its_anchor() {
        let gw = gateway();
        let first = label(&gw, "First").await;
        let _second = label(&gw, "Second").await; // inserted at top: [Second, First]

        let third = gw
            .create_label(
                OPERATOR,
                CreateLabel {
                    name: "Third".to_string(),
                    icon: None,
                    after_label_id: Some(first),
                },
            )
            .await
            .unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let names: Vec<&str> = data.labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Second", "First", "Third"]);
        assert_eq!(third.position, 2);
    }

    #[tokio::test]
    async fn duplicate_label_name_is_rejected() {
        let gw = gateway();
        label(&gw, "Drinks").await;

        let err = gw
            .create_label(
                OPERATOR,
                CreateLabel {
                    name: "Drinks".to_string(),
                    icon: None,
                    after_label_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MenuError::Validation { field: "name", .. }));
    }

    #[tokio::test]
    async fn clone_lands_right_below_the_source_in_every_scope() {
        let gw = gateway();
        let lbl = label(&gw, "Drinks").await;
        let cat_a = category(&gw, "Blends", vec![lbl]).await;
        let cat_b = category(&gw, "Decaf", vec![lbl]).await;

        let clone = gw.clone_category(OPERATOR, cat_a).await.unwrap();
        assert_eq!(clone.name, "Blends copy");

        let data = gw.list_menu_data().await.unwrap();
        let flat: Vec<Uuid> = data.categories.iter().map(|c| c.id).collect();
        assert_eq!(flat, vec![cat_a, clone.id, cat_b]);
        let members: Vec<Uuid> = data
            .labels
            .iter()
            .find(|l| l.id == lbl)
            .unwrap()
            .categories
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(members, vec![cat_a, clone.id, cat_b]);

        // Cloning the clone strips the suffix and counts up.
        let second = gw.clone_category(OPERATOR, clone.id).await.unwrap();
        assert_eq!(second.name, "Blends copy (2)");
    }

    #[tokio::test]
    async fn product_attachment_appends_and_tracks_primary() {
        let gw = gateway();
        let cat_a = category(&gw, "Blends", vec![]).await;
        let cat_b = category(&gw, "Seasonal", vec![]).await;
        let espresso = product("House Espresso");
        let espresso_id = espresso.id;
        gw.seed_product(espresso);

        gw.attach_product_to_category(OPERATOR, espresso_id, cat_a).await.unwrap();
        gw.attach_product_to_category(OPERATOR, espresso_id, cat_b).await.unwrap();
        // repeat attach is a no-op
        gw.attach_product_to_category(OPERATOR, espresso_id, cat_a).await.unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let entries = &data.products.iter().find(|p| p.id == espresso_id).unwrap().categories;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().find(|e| e.category_id == cat_a).unwrap().is_primary);
        assert!(!entries.iter().find(|e| e.category_id == cat_b).unwrap().is_primary);

        // Detaching the primary promotes the survivor.
        gw.detach_product_from_category(OPERATOR, espresso_id, cat_a).await.unwrap();
        let data = gw.list_menu_data().await.unwrap();
        let entries = &data.products.iter().find(|p| p.id == espresso_id).unwrap().categories;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_primary);
    }

    #[tokio::test]
    async fn settings_round_trip_with_defaults() {
        let gw = gateway();
        assert_eq!(gw.menu_settings().await.unwrap(), MenuSettings::default());

        let updated = gw
            .update_menu_settings(
                OPERATOR,
                MenuSettings {
                    icon: "Leaf".to_string(),
                    text: "Teas".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(gw.menu_settings().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn unauthorized_operator_is_refused_without_mutation() {
        let auth = MenuAuthorization::new(Arc::new(StaticPolicy::new(vec![1])));
        let gw = MemoryMenuGateway::new(auth);

        let err = gw
            .create_label(
                99,
                CreateLabel {
                    name: "Drinks".to_string(),
                    icon: None,
                    after_label_id: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MenuError::Unauthorized(99)));
        assert!(gw.list_menu_data().await.unwrap().labels.is_empty());
    }

    #[tokio::test]
    async fn update_category_replaces_label_membership_preserving_survivors() {
        let gw = gateway();
        let lbl_a = label(&gw, "Drinks").await;
        let lbl_b = label(&gw, "Seasonal").await;
        let lbl_c = label(&gw, "Sale").await;
        let keeper = category(&gw, "Keeper", vec![lbl_a]).await;
        let moved = category(&gw, "Moved", vec![lbl_a, lbl_b]).await;

        gw.update_category(
            OPERATOR,
            UpdateCategory {
                id: moved,
                name: None,
                slug: None,
                label_ids: Some(vec![lbl_a, lbl_c]),
                is_visible: None,
            },
        )
        .await
        .unwrap();

        let data = gw.list_menu_data().await.unwrap();
        let in_label = |id: Uuid| -> Vec<Uuid> {
            data.labels
                .iter()
                .find(|l| l.id == id)
                .unwrap()
                .categories
                .iter()
                .map(|c| c.id)
                .collect()
        };
        assert_eq!(in_label(lbl_a), vec![keeper, moved]); // survivor keeps its slot
        assert!(in_label(lbl_b).is_empty());
        assert_eq!(in_label(lbl_c), vec![moved]); // appended at the end
    }

    #[tokio::test]
    async fn new_category_names_disambiguate_on_collision() {
        let gw = gateway();
        let first = gw.create_new_category(OPERATOR, vec![]).await.unwrap();
        let second = gw.create_new_category(OPERATOR, vec![]).await.unwrap();

        assert_eq!(first.name, "New Category");
        assert_eq!(second.name, "New Category (2)");
        assert_ne!(first.slug, second.slug);
    }
}
