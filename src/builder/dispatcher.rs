//! Bulk verbs over the current selection.
//!
//! Each verb maps the selection onto gateway calls, applies the change to
//! the session's cached snapshot optimistically, and pushes exactly one
//! two-directional history entry, so one `undo` reverses the whole bulk
//! action no matter how many gateway calls it fanned out to.
//!
//! A `Transient` gateway outcome is unknown, not failed: the dispatcher
//! re-fetches the snapshot and reconciles instead of rolling back, since a
//! blind rollback after a write that actually landed would corrupt the view.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::database::gateway::require_exact_id_set;
use crate::database::{MenuData, MenuError, MenuGateway, OperatorId};

use super::history::{HistoryEntry, MenuCommand};
use super::state::{BuilderState, SelectionScope};

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item result of a bulk action. Partial success is a real outcome for
/// clone: three selected, one collision, two committed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BulkOutcome {
    fn ok(id: Uuid, created_id: Option<Uuid>) -> ItemOutcome {
        ItemOutcome {
            id,
            ok: true,
            created_id,
            error: None,
        }
    }

    fn failed(id: Uuid, error: &MenuError) -> ItemOutcome {
        ItemOutcome {
            id,
            ok: false,
            created_id: None,
            error: Some(error.to_string()),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.ok).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

pub struct ActionDispatcher {
    gateway: Arc<dyn MenuGateway>,
    operator: OperatorId,
}

impl ActionDispatcher {
    pub fn new(gateway: Arc<dyn MenuGateway>, operator: OperatorId) -> Self {
        Self { gateway, operator }
    }

    /// Clone every selected category, each landing right below its source.
    /// Per-item outcome: one failed clone leaves the others committed.
    pub async fn clone_selected(
        &self,
        state: &mut BuilderState,
    ) -> Result<BulkOutcome, MenuError> {
        let ids = state.selection_in_scope_order();
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }
        if !matches!(state.view().scope(), SelectionScope::Categories { .. }) {
            return Err(MenuError::validation(
                "view",
                "clone is only available for categories",
            ));
        }

        let mut outcome = BulkOutcome::default();
        let mut created: Vec<Uuid> = Vec::new();
        let mut cloned_sources: Vec<Uuid> = Vec::new();

        for id in ids {
            match self.gateway.clone_category(self.operator, id).await {
                Ok(clone) => {
                    created.push(clone.id);
                    cloned_sources.push(id);
                    outcome.items.push(BulkOutcome::ok(id, Some(clone.id)));
                }
                Err(err) => {
                    warn!("Clone of category {} failed: {}", id, err);
                    outcome.items.push(BulkOutcome::failed(id, &err));
                }
            }
        }

        if !created.is_empty() {
            let undo = created
                .iter()
                .rev()
                .map(|category_id| MenuCommand::DeleteCategory {
                    category_id: *category_id,
                })
                .collect();
            let redo = cloned_sources
                .iter()
                .map(|category_id| MenuCommand::CloneCategory {
                    category_id: *category_id,
                })
                .collect();
            state.push_history(HistoryEntry::new(
                format!("clone {} categories", created.len()),
                undo,
                redo,
            ));
        }

        // Structural change, possibly with unknown outcomes mixed in: trust
        // the server, not our bookkeeping.
        state.reconcile(self.gateway.as_ref()).await;
        state.clear_selection();
        Ok(outcome)
    }

    /// Remove the selection from the current view. Labels and loose
    /// categories carry a delete overlay in the storefront, so "remove"
    /// hides them (soft); categories inside a label are detached from that
    /// label only. Hard deletion stays an explicit single-entity call
    /// outside the undo flow.
    pub async fn remove_selected(
        &self,
        state: &mut BuilderState,
    ) -> Result<BulkOutcome, MenuError> {
        let ids = state.selection_in_scope_order();
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }

        match state.view().scope() {
            SelectionScope::Labels => {
                self.broadcast_visibility(state, ids, false, "remove labels from menu")
                    .await
            }
            SelectionScope::Categories { label_id: None } => {
                self.broadcast_visibility(state, ids, false, "remove categories from menu")
                    .await
            }
            SelectionScope::Categories {
                label_id: Some(label_id),
            } => self.detach_categories(state, label_id, ids).await,
            SelectionScope::Products { category_id } => {
                self.detach_products(state, category_id, ids).await
            }
        }
    }

    /// Broadcast visibility over the selection. Mixed selections resolve to
    /// "make all visible"; undo restores each member's individual prior
    /// value in one step.
    pub async fn toggle_visibility(
        &self,
        state: &mut BuilderState,
    ) -> Result<BulkOutcome, MenuError> {
        let ids = state.selection_in_scope_order();
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let prior = self.visibility_of(state.data(), state.view().scope(), &ids)?;
        let target = ids.iter().any(|id| prior.get(id) == Some(&false));
        let description = if target {
            format!("show {} entries", ids.len())
        } else {
            format!("hide {} entries", ids.len())
        };
        self.apply_visibility(state, ids, prior, target, &description)
            .await
    }

    /// Persist a full new ordering for the current scope. The id sequence
    /// must match the scope's membership exactly (checked locally first and
    /// again by the gateway transaction).
    pub async fn reorder(
        &self,
        state: &mut BuilderState,
        ordered_ids: Vec<Uuid>,
    ) -> Result<(), MenuError> {
        let current = state.scope_ids();
        require_exact_id_set(&ordered_ids, &current, "ordered_ids")?;
        if ordered_ids == current {
            return Ok(());
        }

        let scope = state.view().scope();
        let (forward, inverse) = match scope {
            SelectionScope::Labels => (
                MenuCommand::ReorderLabels(ordered_ids.clone()),
                MenuCommand::ReorderLabels(current.clone()),
            ),
            SelectionScope::Categories { label_id: None } => {
                return Err(MenuError::validation(
                    "view",
                    "the flat category list keeps creation order",
                ));
            }
            SelectionScope::Categories {
                label_id: Some(label_id),
            } => (
                MenuCommand::ReorderCategoriesInLabel {
                    label_id,
                    category_ids: ordered_ids.clone(),
                },
                MenuCommand::ReorderCategoriesInLabel {
                    label_id,
                    category_ids: current.clone(),
                },
            ),
            SelectionScope::Products { category_id } => (
                MenuCommand::ReorderProductsInCategory {
                    category_id,
                    product_ids: ordered_ids.clone(),
                },
                MenuCommand::ReorderProductsInCategory {
                    category_id,
                    product_ids: current.clone(),
                },
            ),
        };

        // Optimistic: the view shows the new order while the write is in
        // flight.
        patch_sequence(state.data_mut(), scope, &ordered_ids);

        match forward.apply(self.gateway.as_ref(), self.operator).await {
            Ok(_) => {
                state.push_history(HistoryEntry::new(
                    "reorder",
                    vec![inverse],
                    vec![forward],
                ));
                Ok(())
            }
            Err(MenuError::Transient(msg)) => {
                state.reconcile(self.gateway.as_ref()).await;
                Err(MenuError::Transient(msg))
            }
            Err(err) => {
                patch_sequence(state.data_mut(), scope, &current);
                Err(err)
            }
        }
    }

    pub async fn undo(&self, state: &mut BuilderState) -> Result<Option<String>, MenuError> {
        state.undo(self.gateway.as_ref(), self.operator).await
    }

    pub async fn redo(&self, state: &mut BuilderState) -> Result<Option<String>, MenuError> {
        state.redo(self.gateway.as_ref(), self.operator).await
    }

    // ==================== INTERNALS ====================

    fn visibility_of(
        &self,
        data: &MenuData,
        scope: SelectionScope,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, MenuError> {
        let lookup: HashMap<Uuid, bool> = match scope {
            SelectionScope::Labels => data.labels.iter().map(|l| (l.id, l.is_visible)).collect(),
            SelectionScope::Categories { .. } => data
                .categories
                .iter()
                .map(|c| (c.id, c.is_visible))
                .collect(),
            SelectionScope::Products { .. } => {
                return Err(MenuError::validation(
                    "view",
                    "product visibility belongs to the catalog",
                ));
            }
        };
        Ok(ids
            .iter()
            .filter_map(|id| lookup.get(id).map(|visible| (*id, *visible)))
            .collect())
    }

    async fn broadcast_visibility(
        &self,
        state: &mut BuilderState,
        ids: Vec<Uuid>,
        target: bool,
        description: &str,
    ) -> Result<BulkOutcome, MenuError> {
        let prior = self.visibility_of(state.data(), state.view().scope(), &ids)?;
        self.apply_visibility(state, ids, prior, target, description)
            .await
    }

    async fn apply_visibility(
        &self,
        state: &mut BuilderState,
        ids: Vec<Uuid>,
        prior: HashMap<Uuid, bool>,
        target: bool,
        description: &str,
    ) -> Result<BulkOutcome, MenuError> {
        let scope = state.view().scope();
        // Ids no longer in the snapshot are dropped from the action.
        let ids: Vec<Uuid> = ids
            .into_iter()
            .filter(|id| prior.contains_key(id))
            .collect();
        if ids.is_empty() {
            return Ok(BulkOutcome::default());
        }

        for id in &ids {
            patch_visibility(state.data_mut(), scope, *id, target);
        }

        let mut applied: Vec<Uuid> = Vec::new();
        for id in &ids {
            let command = visibility_command(scope, *id, target);
            match command.apply(self.gateway.as_ref(), self.operator).await {
                Ok(_) => applied.push(*id),
                Err(MenuError::NotFound { .. }) => {
                    // Deleted under us; the final reconcile drops it.
                    applied.push(*id);
                }
                Err(MenuError::Transient(msg)) => {
                    state.reconcile(self.gateway.as_ref()).await;
                    return Err(MenuError::Transient(msg));
                }
                Err(err) => {
                    // Total rollback: compensate the writes that landed and
                    // restore the snapshot.
                    for rollback_id in &applied {
                        let previous = prior.get(rollback_id).copied().unwrap_or(target);
                        let compensate = visibility_command(scope, *rollback_id, previous);
                        if let Err(rollback_err) =
                            compensate.apply(self.gateway.as_ref(), self.operator).await
                        {
                            warn!("Visibility rollback failed: {}", rollback_err);
                        }
                    }
                    for id in &ids {
                        if let Some(previous) = prior.get(id) {
                            patch_visibility(state.data_mut(), scope, *id, *previous);
                        }
                    }
                    return Err(err);
                }
            }
        }

        let undo = ids
            .iter()
            .map(|id| visibility_command(scope, *id, prior.get(id).copied().unwrap_or(target)))
            .collect();
        let redo = ids
            .iter()
            .map(|id| visibility_command(scope, *id, target))
            .collect();
        state.push_history(HistoryEntry::new(description, undo, redo));

        let outcome = BulkOutcome {
            items: ids
                .iter()
                .map(|id| BulkOutcome::ok(*id, None))
                .collect(),
        };
        state.clear_selection();
        Ok(outcome)
    }

    async fn detach_categories(
        &self,
        state: &mut BuilderState,
        label_id: Uuid,
        ids: Vec<Uuid>,
    ) -> Result<BulkOutcome, MenuError> {
        let prior_sequence = state.scope_ids();
        let auto_order = state
            .data()
            .labels
            .iter()
            .find(|l| l.id == label_id)
            .is_some_and(|l| l.auto_order);

        let mut detached: Vec<Uuid> = Vec::new();
        for id in &ids {
            match self
                .gateway
                .detach_category_from_label(self.operator, label_id, *id)
                .await
            {
                Ok(()) => detached.push(*id),
                Err(MenuError::NotFound { .. }) => detached.push(*id),
                Err(MenuError::Transient(msg)) => {
                    state.reconcile(self.gateway.as_ref()).await;
                    return Err(MenuError::Transient(msg));
                }
                Err(err) => {
                    // Put the already-detached members back, then the old
                    // order; the view re-syncs from the server.
                    for rollback_id in &detached {
                        let _ = self
                            .gateway
                            .attach_category_to_label(self.operator, label_id, *rollback_id)
                            .await;
                    }
                    if !auto_order && !detached.is_empty() {
                        let _ = self
                            .gateway
                            .reorder_categories_in_label(
                                self.operator,
                                label_id,
                                prior_sequence.clone(),
                            )
                            .await;
                    }
                    state.reconcile(self.gateway.as_ref()).await;
                    return Err(err);
                }
            }
        }

        let mut undo: Vec<MenuCommand> = detached
            .iter()
            .map(|category_id| MenuCommand::AttachCategoryToLabel {
                label_id,
                category_id: *category_id,
            })
            .collect();
        if !auto_order {
            undo.push(MenuCommand::ReorderCategoriesInLabel {
                label_id,
                category_ids: prior_sequence,
            });
        }
        let redo = detached
            .iter()
            .map(|category_id| MenuCommand::DetachCategoryFromLabel {
                label_id,
                category_id: *category_id,
            })
            .collect();
        state.push_history(HistoryEntry::new(
            format!("remove {} categories from label", detached.len()),
            undo,
            redo,
        ));

        state.reconcile(self.gateway.as_ref()).await;
        let outcome = BulkOutcome {
            items: detached
                .iter()
                .map(|id| BulkOutcome::ok(*id, None))
                .collect(),
        };
        state.clear_selection();
        Ok(outcome)
    }

    async fn detach_products(
        &self,
        state: &mut BuilderState,
        category_id: Uuid,
        ids: Vec<Uuid>,
    ) -> Result<BulkOutcome, MenuError> {
        let prior_sequence = state.scope_ids();

        let mut detached: Vec<Uuid> = Vec::new();
        for id in &ids {
            match self
                .gateway
                .detach_product_from_category(self.operator, *id, category_id)
                .await
            {
                Ok(()) => detached.push(*id),
                Err(MenuError::NotFound { .. }) => detached.push(*id),
                Err(MenuError::Transient(msg)) => {
                    state.reconcile(self.gateway.as_ref()).await;
                    return Err(MenuError::Transient(msg));
                }
                Err(err) => {
                    for rollback_id in &detached {
                        let _ = self
                            .gateway
                            .attach_product_to_category(self.operator, *rollback_id, category_id)
                            .await;
                    }
                    if !detached.is_empty() {
                        let _ = self
                            .gateway
                            .reorder_products_in_category(
                                self.operator,
                                category_id,
                                prior_sequence.clone(),
                            )
                            .await;
                    }
                    state.reconcile(self.gateway.as_ref()).await;
                    return Err(err);
                }
            }
        }

        let mut undo: Vec<MenuCommand> = detached
            .iter()
            .map(|product_id| MenuCommand::AttachProductToCategory {
                category_id,
                product_id: *product_id,
            })
            .collect();
        undo.push(MenuCommand::ReorderProductsInCategory {
            category_id,
            product_ids: prior_sequence,
        });
        let redo = detached
            .iter()
            .map(|product_id| MenuCommand::DetachProductFromCategory {
                category_id,
                product_id: *product_id,
            })
            .collect();
        state.push_history(HistoryEntry::new(
            format!("remove {} products from category", detached.len()),
            undo,
            redo,
        ));

        state.reconcile(self.gateway.as_ref()).await;
        let outcome = BulkOutcome {
            items: detached
                .iter()
                .map(|id| BulkOutcome::ok(*id, None))
                .collect(),
        };
        state.clear_selection();
        Ok(outcome)
    }
}

fn visibility_command(scope: SelectionScope, id: Uuid, visible: bool) -> MenuCommand {
    match scope {
        SelectionScope::Labels => MenuCommand::SetLabelVisibility {
            label_id: id,
            visible,
        },
        SelectionScope::Categories { .. } => MenuCommand::SetCategoryVisibility {
            category_id: id,
            visible,
        },
        // Guarded by visibility_of before any command is built.
        SelectionScope::Products { .. } => unreachable!("products have no menu visibility"),
    }
}

fn patch_visibility(data: &mut MenuData, scope: SelectionScope, id: Uuid, visible: bool) {
    match scope {
        SelectionScope::Labels => {
            if let Some(label) = data.labels.iter_mut().find(|l| l.id == id) {
                label.is_visible = visible;
            }
        }
        SelectionScope::Categories { .. } => {
            if let Some(category) = data.categories.iter_mut().find(|c| c.id == id) {
                category.is_visible = visible;
            }
        }
        SelectionScope::Products { .. } => {}
    }
}

/// Rewrite the cached snapshot's order for one scope.
fn patch_sequence(data: &mut MenuData, scope: SelectionScope, ordered: &[Uuid]) {
    let index_of = |id: Uuid| ordered.iter().position(|o| *o == id);
    match scope {
        SelectionScope::Labels => {
            data.labels.sort_by_key(|l| index_of(l.id).unwrap_or(usize::MAX));
            for (idx, label) in data.labels.iter_mut().enumerate() {
                label.position = idx as i32;
            }
        }
        SelectionScope::Categories { label_id: None } => {}
        SelectionScope::Categories {
            label_id: Some(label_id),
        } => {
            if let Some(label) = data.labels.iter_mut().find(|l| l.id == label_id) {
                label
                    .categories
                    .sort_by_key(|c| index_of(c.id).unwrap_or(usize::MAX));
                for (idx, category) in label.categories.iter_mut().enumerate() {
                    category.position = idx as i32;
                }
            }
        }
        SelectionScope::Products { category_id } => {
            for product in data.products.iter_mut() {
                if let Some(idx) = index_of(product.id) {
                    for entry in product.categories.iter_mut() {
                        if entry.category_id == category_id {
                            entry.position = idx as i32;
                        }
                    }
                }
            }
        }
    }
}
