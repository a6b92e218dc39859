use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::{CreateLabel, MenuGateway, MenuLabel, UpdateLabel};
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::security::AuthenticatedOperator;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

fn ok() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

pub async fn create_label_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Json(request): Json<CreateLabel>,
) -> Result<Json<MenuLabel>, ApiError> {
    info!(
        "Operator {} creating label '{}'",
        operator.operator_id, request.name
    );

    let label = gateway.create_label(operator.operator_id, request).await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::LabelCreated)
            .entity(label.id)
            .detail(label.name.clone())
            .build(),
    );

    Ok(Json(label))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLabelRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub is_visible: Option<bool>,
    pub auto_order: Option<bool>,
}

pub async fn update_label_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLabelRequest>,
) -> Result<Json<MenuLabel>, ApiError> {
    let label = gateway
        .update_label(
            operator.operator_id,
            UpdateLabel {
                id,
                name: request.name,
                icon: request.icon,
                is_visible: request.is_visible,
                auto_order: request.auto_order,
            },
        )
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::LabelUpdated)
            .entity(id)
            .build(),
    );

    Ok(Json(label))
}

pub async fn delete_label_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    info!("Operator {} deleting label {}", operator.operator_id, id);

    gateway.delete_label(operator.operator_id, id).await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::LabelDeleted)
            .entity(id)
            .build(),
    );

    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct ReorderLabelsRequest {
    pub label_ids: Vec<Uuid>,
}

pub async fn reorder_labels_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Json(request): Json<ReorderLabelsRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .reorder_labels(operator.operator_id, request.label_ids)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::OrderCommitted)
            .detail("labels")
            .build(),
    );

    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct ReorderLabelCategoriesRequest {
    pub category_ids: Vec<Uuid>,
}

pub async fn reorder_label_categories_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(label_id): Path<Uuid>,
    Json(request): Json<ReorderLabelCategoriesRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .reorder_categories_in_label(operator.operator_id, label_id, request.category_ids)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::OrderCommitted)
            .entity(label_id)
            .detail("label categories")
            .build(),
    );

    Ok(ok())
}

pub async fn auto_sort_label_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(label_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .auto_sort_categories_in_label(operator.operator_id, label_id)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::AutoSortApplied)
            .entity(label_id)
            .build(),
    );

    Ok(ok())
}

pub async fn attach_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path((label_id, category_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .attach_category_to_label(operator.operator_id, label_id, category_id)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryAttached)
            .entity(category_id)
            .detail(format!("label {label_id}"))
            .build(),
    );

    Ok(ok())
}

pub async fn detach_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path((label_id, category_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .detach_category_from_label(operator.operator_id, label_id, category_id)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryDetached)
            .entity(category_id)
            .detail(format!("label {label_id}"))
            .build(),
    );

    Ok(ok())
}
