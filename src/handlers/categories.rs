use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::{CreateCategory, MenuCategory, MenuGateway, UpdateCategory};
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::security::AuthenticatedOperator;
use crate::utils::error::ApiError;

pub async fn create_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Json(request): Json<CreateCategory>,
) -> Result<Json<MenuCategory>, ApiError> {
    info!(
        "Operator {} creating category '{}'",
        operator.operator_id, request.name
    );

    let category = gateway.create_category(operator.operator_id, request).await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryCreated)
            .entity(category.id)
            .detail(category.name.clone())
            .build(),
    );

    Ok(Json(category))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateNewCategoryRequest {
    #[serde(default)]
    pub label_ids: Vec<Uuid>,
}

/// Server-owned workflow: the server picks a free "New Category (n)" name.
pub async fn create_new_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Json(request): Json<CreateNewCategoryRequest>,
) -> Result<Json<MenuCategory>, ApiError> {
    let category = gateway
        .create_new_category(operator.operator_id, request.label_ids)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryCreated)
            .entity(category.id)
            .detail(category.name.clone())
            .build(),
    );

    Ok(Json(category))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub label_ids: Option<Vec<Uuid>>,
    pub is_visible: Option<bool>,
}

pub async fn update_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCategoryRequest>,
) -> Result<Json<MenuCategory>, ApiError> {
    let category = gateway
        .update_category(
            operator.operator_id,
            UpdateCategory {
                id,
                name: request.name,
                slug: request.slug,
                label_ids: request.label_ids,
                is_visible: request.is_visible,
            },
        )
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryUpdated)
            .entity(id)
            .build(),
    );

    Ok(Json(category))
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: Uuid,
}

pub async fn delete_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedResponse>, ApiError> {
    info!("Operator {} deleting category {}", operator.operator_id, id);

    gateway.delete_category(operator.operator_id, id).await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryDeleted)
            .entity(id)
            .build(),
    );

    Ok(Json(DeletedResponse { id }))
}

pub async fn clone_category_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(id): Path<Uuid>,
) -> Result<Json<MenuCategory>, ApiError> {
    let clone = gateway.clone_category(operator.operator_id, id).await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::CategoryCloned)
            .entity(clone.id)
            .detail(clone.name.clone())
            .build(),
    );

    Ok(Json(clone))
}
