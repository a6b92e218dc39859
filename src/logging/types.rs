use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Menu mutation audit categories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    CategoryCreated,
    CategoryUpdated,
    CategoryDeleted,
    CategoryCloned,
    LabelCreated,
    LabelUpdated,
    LabelDeleted,
    CategoryAttached,
    CategoryDetached,
    ProductAttached,
    ProductDetached,
    OrderCommitted,
    AutoSortApplied,
    SettingsUpdated,
    SessionCreated,
    BulkActionDispatched,
    UndoApplied,
    RedoApplied,
    MutationRejected,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CategoryCreated => "category_created",
            Self::CategoryUpdated => "category_updated",
            Self::CategoryDeleted => "category_deleted",
            Self::CategoryCloned => "category_cloned",
            Self::LabelCreated => "label_created",
            Self::LabelUpdated => "label_updated",
            Self::LabelDeleted => "label_deleted",
            Self::CategoryAttached => "category_attached",
            Self::CategoryDetached => "category_detached",
            Self::ProductAttached => "product_attached",
            Self::ProductDetached => "product_detached",
            Self::OrderCommitted => "order_committed",
            Self::AutoSortApplied => "auto_sort_applied",
            Self::SettingsUpdated => "settings_updated",
            Self::SessionCreated => "session_created",
            Self::BulkActionDispatched => "bulk_action_dispatched",
            Self::UndoApplied => "undo_applied",
            Self::RedoApplied => "redo_applied",
            Self::MutationRejected => "mutation_rejected",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

/// Complete audit entry for one menu mutation
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub operator_id: i64,
    pub session_id: Option<Uuid>,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    /// The label/category/product the mutation was about, when there is one.
    pub entity_id: Option<Uuid>,
    pub detail: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn builder(operator_id: i64, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(operator_id, activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(operator_id: i64, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                operator_id,
                session_id: None,
                activity_type,
                activity_status: ActivityStatus::Success,
                entity_id: None,
                detail: None,
                error_message: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.log.session_id = Some(session_id);
        self
    }

    pub fn entity(mut self, entity_id: Uuid) -> Self {
        self.log.entity_id = Some(entity_id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.log.detail = Some(detail.into());
        self
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.log.activity_status = ActivityStatus::Error;
        self.log.error_message = Some(message.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
