use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::labels::OkResponse;
use crate::database::MenuGateway;
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::security::AuthenticatedOperator;
use crate::utils::error::ApiError;

pub async fn attach_product_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path((category_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .attach_product_to_category(operator.operator_id, product_id, category_id)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::ProductAttached)
            .entity(product_id)
            .detail(format!("category {category_id}"))
            .build(),
    );

    Ok(Json(OkResponse { ok: true }))
}

pub async fn detach_product_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path((category_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .detach_product_from_category(operator.operator_id, product_id, category_id)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::ProductDetached)
            .entity(product_id)
            .detail(format!("category {category_id}"))
            .build(),
    );

    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct ReorderProductsRequest {
    pub product_ids: Vec<Uuid>,
}

pub async fn reorder_category_products_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(category_id): Path<Uuid>,
    Json(request): Json<ReorderProductsRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    gateway
        .reorder_products_in_category(operator.operator_id, category_id, request.product_ids)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::OrderCommitted)
            .entity(category_id)
            .detail("category products")
            .build(),
    );

    Ok(Json(OkResponse { ok: true }))
}
