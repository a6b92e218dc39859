//! Builder session state: which view the operator is looking at, what they
//! have selected and expanded, and the undo/redo history of committed bulk
//! actions.
//!
//! This is an explicit, injectable container: one per builder session,
//! passed by reference through the dispatcher, never a shared singleton.
//! Two concurrent sessions cannot bleed history into each other.

use std::collections::HashSet;

use uuid::Uuid;

use crate::database::{MenuData, MenuError, MenuGateway, OperatorId};

use super::history::{HistoryEntry, MenuCommand};

/// The current view. A closed sum type: every view-dependent behavior is an
/// exhaustive `match`, so adding a view is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderView {
    Menu,
    AllLabels,
    AllCategories,
    Label {
        label_id: Uuid,
    },
    Category {
        /// The label the operator drilled through, when they came from one.
        label_id: Option<Uuid>,
        category_id: Uuid,
    },
}

/// What kind of entity the current view's selection refers to. Bulk verbs
/// use this to pick the matching gateway calls, so a selection can never be
/// applied to entities from a different scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionScope {
    Labels,
    Categories { label_id: Option<Uuid> },
    Products { category_id: Uuid },
}

impl BuilderView {
    pub fn scope(&self) -> SelectionScope {
        match self {
            BuilderView::Menu | BuilderView::AllLabels => SelectionScope::Labels,
            BuilderView::AllCategories => SelectionScope::Categories { label_id: None },
            BuilderView::Label { label_id } => SelectionScope::Categories {
                label_id: Some(*label_id),
            },
            BuilderView::Category { category_id, .. } => SelectionScope::Products {
                category_id: *category_id,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuilderView::Menu => "menu",
            BuilderView::AllLabels => "all-labels",
            BuilderView::AllCategories => "all-categories",
            BuilderView::Label { .. } => "label",
            BuilderView::Category { .. } => "category",
        }
    }
}

pub struct BuilderState {
    view: BuilderView,
    view_stack: Vec<BuilderView>,
    selection: HashSet<Uuid>,
    expanded: HashSet<Uuid>,
    history: Vec<HistoryEntry>,
    future: Vec<HistoryEntry>,
    data: MenuData,
}

impl BuilderState {
    pub fn new(data: MenuData) -> Self {
        Self {
            view: BuilderView::Menu,
            view_stack: Vec::new(),
            selection: HashSet::new(),
            expanded: HashSet::new(),
            history: Vec::new(),
            future: Vec::new(),
            data,
        }
    }

    // ==================== NAVIGATION ====================
    // Selection is view-scoped: every navigation clears it so a bulk verb
    // can never act on entities from the previous view.

    pub fn view(&self) -> BuilderView {
        self.view
    }

    pub fn navigate_to_view(&mut self, view: BuilderView) {
        self.view_stack.push(self.view);
        self.view = view;
        self.selection.clear();
    }

    pub fn navigate_to_label(&mut self, label_id: Uuid) {
        self.navigate_to_view(BuilderView::Label { label_id });
    }

    pub fn navigate_to_category(&mut self, category_id: Uuid) {
        let label_id = match self.view {
            BuilderView::Label { label_id } => Some(label_id),
            _ => None,
        };
        self.navigate_to_view(BuilderView::Category {
            label_id,
            category_id,
        });
    }

    /// Pop the view stack. Popping an empty stack is a no-op that stays on
    /// the top-level menu.
    pub fn navigate_back(&mut self) {
        match self.view_stack.pop() {
            Some(previous) => self.view = previous,
            None => self.view = BuilderView::Menu,
        }
        self.selection.clear();
    }

    // ==================== SELECTION ====================

    pub fn selection(&self) -> &HashSet<Uuid> {
        &self.selection
    }

    /// Selected ids in the display order of the current scope.
    pub fn selection_in_scope_order(&self) -> Vec<Uuid> {
        self.scope_ids()
            .into_iter()
            .filter(|id| self.selection.contains(id))
            .collect()
    }

    pub fn toggle_selection(&mut self, id: Uuid) {
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
    }

    pub fn select_all(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        self.selection = ids.into_iter().collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ==================== EXPAND / COLLAPSE ====================

    pub fn expanded(&self) -> &HashSet<Uuid> {
        &self.expanded
    }

    pub fn toggle_expand(&mut self, id: Uuid) {
        if !self.expanded.remove(&id) {
            self.expanded.insert(id);
        }
    }

    pub fn expand_all(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        self.expanded = ids.into_iter().collect();
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    // ==================== SNAPSHOT ====================

    pub fn data(&self) -> &MenuData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut MenuData {
        &mut self.data
    }

    pub fn set_data(&mut self, data: MenuData) {
        self.data = data;
    }

    /// Member ids of the current view's scope, in display order.
    pub fn scope_ids(&self) -> Vec<Uuid> {
        match self.view.scope() {
            SelectionScope::Labels => self.data.labels.iter().map(|l| l.id).collect(),
            SelectionScope::Categories { label_id: None } => {
                self.data.categories.iter().map(|c| c.id).collect()
            }
            SelectionScope::Categories {
                label_id: Some(label_id),
            } => self
                .data
                .labels
                .iter()
                .find(|l| l.id == label_id)
                .map(|l| l.categories.iter().map(|c| c.id).collect())
                .unwrap_or_default(),
            SelectionScope::Products { category_id } => {
                let mut entries: Vec<(i32, Uuid)> = self
                    .data
                    .products
                    .iter()
                    .flat_map(|p| {
                        p.categories
                            .iter()
                            .filter(|e| e.category_id == category_id)
                            .map(|e| (e.position, p.id))
                    })
                    .collect();
                entries.sort_by_key(|(position, _)| *position);
                entries.into_iter().map(|(_, id)| id).collect()
            }
        }
    }

    // ==================== HISTORY ====================

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// Record a committed bulk action. New actions invalidate the redo
    /// stack, as in any linear history.
    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.future.clear();
    }

    /// Reverse the most recent bulk action. On gateway failure the entry is
    /// re-pushed onto the history stack and the snapshot is reconciled, so
    /// the view reflects some real server state, never a half-undone one.
    pub async fn undo(
        &mut self,
        gateway: &dyn MenuGateway,
        operator: OperatorId,
    ) -> Result<Option<String>, MenuError> {
        let Some(entry) = self.history.pop() else {
            return Ok(None);
        };

        for command in &entry.undo {
            match command.apply(gateway, operator).await {
                Ok(_) => {}
                // The target vanished (another operator deleted it): drop it
                // from the entry's concerns and keep unwinding.
                Err(MenuError::NotFound { .. }) => continue,
                Err(err) => {
                    self.history.push(entry);
                    self.reconcile(gateway).await;
                    return Err(err);
                }
            }
        }

        let description = entry.description.clone();
        self.future.push(entry);
        self.reconcile(gateway).await;
        Ok(Some(description))
    }

    /// Re-apply the most recently undone bulk action.
    pub async fn redo(
        &mut self,
        gateway: &dyn MenuGateway,
        operator: OperatorId,
    ) -> Result<Option<String>, MenuError> {
        let Some(mut entry) = self.future.pop() else {
            return Ok(None);
        };

        let mut created: Vec<Uuid> = Vec::new();
        for command in &entry.redo {
            match command.apply(gateway, operator).await {
                Ok(maybe_created) => created.extend(maybe_created),
                Err(MenuError::NotFound { .. }) => continue,
                Err(err) => {
                    self.future.push(entry);
                    self.reconcile(gateway).await;
                    return Err(err);
                }
            }
        }

        // Redone clones get fresh ids; rebuild the undo side so the next
        // undo deletes the clones that now exist.
        if entry
            .redo
            .iter()
            .any(|c| matches!(c, MenuCommand::CloneCategory { .. }))
        {
            entry.undo = created
                .into_iter()
                .map(|category_id| MenuCommand::DeleteCategory { category_id })
                .collect();
        }

        let description = entry.description.clone();
        self.history.push(entry);
        self.reconcile(gateway).await;
        Ok(Some(description))
    }

    /// Best-effort refetch after an ambiguous or failed mutation. A refetch
    /// failure keeps the last-known-good snapshot, which is still some real
    /// server state.
    pub async fn reconcile(&mut self, gateway: &dyn MenuGateway) {
        if let Ok(data) = gateway.list_menu_data().await {
            self.data = data;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MenuSettings;

    fn empty_data() -> MenuData {
        MenuData {
            labels: Vec::new(),
            categories: Vec::new(),
            products: Vec::new(),
            settings: MenuSettings::default(),
        }
    }

    #[test]
    fn navigation_stacks_and_pops_in_lifo_order() {
        let mut state = BuilderState::new(empty_data());
        let label_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();

        state.navigate_to_label(label_id);
        state.navigate_to_category(category_id);
        assert_eq!(
            state.view(),
            BuilderView::Category {
                label_id: Some(label_id),
                category_id
            }
        );

        state.navigate_back();
        assert_eq!(state.view(), BuilderView::Label { label_id });
        state.navigate_back();
        assert_eq!(state.view(), BuilderView::Menu);
    }

    #[test]
    fn back_on_an_empty_stack_stays_on_menu() {
        let mut state = BuilderState::new(empty_data());
        state.navigate_back();
        state.navigate_back();
        assert_eq!(state.view(), BuilderView::Menu);
    }

    #[test]
    fn navigation_clears_the_selection() {
        let mut state = BuilderState::new(empty_data());
        let id = Uuid::new_v4();
        state.toggle_selection(id);
        assert!(state.selection().contains(&id));

        state.navigate_to_view(BuilderView::AllCategories);
        assert!(state.selection().is_empty());
    }

    #[test]
    fn expansion_is_independent_of_selection() {
        let mut state = BuilderState::new(empty_data());
        let id = Uuid::new_v4();

        state.toggle_expand(id);
        state.toggle_selection(id);
        state.clear_selection();
        assert!(state.expanded().contains(&id));

        state.toggle_expand(id);
        assert!(state.expanded().is_empty());
    }

    #[test]
    fn selection_toggles_in_and_out() {
        let mut state = BuilderState::new(empty_data());
        let id = Uuid::new_v4();

        state.toggle_selection(id);
        state.toggle_selection(id);
        assert!(state.selection().is_empty());

        state.select_all([Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(state.selection().len(), 2);
        state.clear_selection();
        assert!(state.selection().is_empty());
    }

    #[test]
    fn new_actions_clear_the_redo_stack() {
        let mut state = BuilderState::new(empty_data());
        state.push_history(HistoryEntry::new("first", Vec::new(), Vec::new()));
        // Simulate an undo having parked an entry on the redo stack.
        state.future.push(HistoryEntry::new("parked", Vec::new(), Vec::new()));

        state.push_history(HistoryEntry::new("second", Vec::new(), Vec::new()));
        assert_eq!(state.future_len(), 0);
        assert_eq!(state.history_len(), 2);
    }

    #[test]
    fn view_scopes_are_exhaustive_over_views() {
        let label_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();
        assert_eq!(BuilderView::Menu.scope(), SelectionScope::Labels);
        assert_eq!(BuilderView::AllLabels.scope(), SelectionScope::Labels);
        assert_eq!(
            BuilderView::AllCategories.scope(),
            SelectionScope::Categories { label_id: None }
        );
        assert_eq!(
            BuilderView::Label { label_id }.scope(),
            SelectionScope::Categories {
                label_id: Some(label_id)
            }
        );
        assert_eq!(
            BuilderView::Category {
                label_id: None,
                category_id
            }
            .scope(),
            SelectionScope::Products { category_id }
        );
    }
}
