use uuid::Uuid;

use crate::database::{
    MenuError, MenuGateway, OperatorId, UpdateCategory, UpdateLabel,
};

/// A replayable gateway mutation. Undo/redo entries are built from these so
/// one entry can reverse or replay a whole bulk action with plain gateway
/// calls.
#[derive(Debug, Clone)]
pub enum MenuCommand {
    ReorderLabels(Vec<Uuid>),
    ReorderCategoriesInLabel {
        label_id: Uuid,
        category_ids: Vec<Uuid>,
    },
    ReorderProductsInCategory {
        category_id: Uuid,
        product_ids: Vec<Uuid>,
    },
    SetLabelVisibility {
        label_id: Uuid,
        visible: bool,
    },
    SetCategoryVisibility {
        category_id: Uuid,
        visible: bool,
    },
    AttachCategoryToLabel {
        label_id: Uuid,
        category_id: Uuid,
    },
    DetachCategoryFromLabel {
        label_id: Uuid,
        category_id: Uuid,
    },
    AttachProductToCategory {
        category_id: Uuid,
        product_id: Uuid,
    },
    DetachProductFromCategory {
        category_id: Uuid,
        product_id: Uuid,
    },
    CloneCategory {
        category_id: Uuid,
    },
    DeleteCategory {
        category_id: Uuid,
    },
}

impl MenuCommand {
    /// Issue the matching gateway call. Returns the id of a newly created
    /// entity (clones) so callers can rebuild compensating commands.
    pub async fn apply(
        &self,
        gateway: &dyn MenuGateway,
        operator: OperatorId,
    ) -> Result<Option<Uuid>, MenuError> {
        match self {
            MenuCommand::ReorderLabels(label_ids) => {
                gateway.reorder_labels(operator, label_ids.clone()).await?;
                Ok(None)
            }
            MenuCommand::ReorderCategoriesInLabel {
                label_id,
                category_ids,
            } => {
                gateway
                    .reorder_categories_in_label(operator, *label_id, category_ids.clone())
                    .await?;
                Ok(None)
            }
            MenuCommand::ReorderProductsInCategory {
                category_id,
                product_ids,
            } => {
                gateway
                    .reorder_products_in_category(operator, *category_id, product_ids.clone())
                    .await?;
                Ok(None)
            }
            MenuCommand::SetLabelVisibility { label_id, visible } => {
                gateway
                    .update_label(
                        operator,
                        UpdateLabel {
                            id: *label_id,
                            name: None,
                            icon: None,
                            is_visible: Some(*visible),
                            auto_order: None,
                        },
                    )
                    .await?;
                Ok(None)
            }
            MenuCommand::SetCategoryVisibility {
                category_id,
                visible,
            } => {
                gateway
                    .update_category(
                        operator,
                        UpdateCategory {
                            id: *category_id,
                            name: None,
                            slug: None,
                            label_ids: None,
                            is_visible: Some(*visible),
                        },
                    )
                    .await?;
                Ok(None)
            }
            MenuCommand::AttachCategoryToLabel {
                label_id,
                category_id,
            } => {
                gateway
                    .attach_category_to_label(operator, *label_id, *category_id)
                    .await?;
                Ok(None)
            }
            MenuCommand::DetachCategoryFromLabel {
                label_id,
                category_id,
            } => {
                gateway
                    .detach_category_from_label(operator, *label_id, *category_id)
                    .await?;
                Ok(None)
            }
            MenuCommand::AttachProductToCategory {
                category_id,
                product_id,
            } => {
                gateway
                    .attach_product_to_category(operator, *product_id, *category_id)
                    .await?;
                Ok(None)
            }
            MenuCommand::DetachProductFromCategory {
                category_id,
                product_id,
            } => {
                gateway
                    .detach_product_from_category(operator, *product_id, *category_id)
                    .await?;
                Ok(None)
            }
            MenuCommand::CloneCategory { category_id } => {
                let created = gateway.clone_category(operator, *category_id).await?;
                Ok(Some(created.id))
            }
            MenuCommand::DeleteCategory { category_id } => {
                gateway.delete_category(operator, *category_id).await?;
                Ok(None)
            }
        }
    }
}

/// One operator-visible step: a bulk action recorded in both directions.
/// Undoing applies `undo` and parks the entry on the redo stack; redoing
/// applies `redo` and parks it back.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub description: String,
    pub undo: Vec<MenuCommand>,
    pub redo: Vec<MenuCommand>,
}

impl HistoryEntry {
    pub fn new(
        description: impl Into<String>,
        undo: Vec<MenuCommand>,
        redo: Vec<MenuCommand>,
    ) -> Self {
        Self {
            description: description.into(),
            undo,
            redo,
        }
    }
}
