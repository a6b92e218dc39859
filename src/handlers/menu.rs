use axum::{extract::Extension, Json};
use std::sync::Arc;
use tracing::info;

use crate::database::{MenuData, MenuGateway, MenuSettings};
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::security::AuthenticatedOperator;
use crate::utils::error::ApiError;

/// Full denormalized snapshot the builder seeds from.
pub async fn list_menu_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
) -> Result<Json<MenuData>, ApiError> {
    let data = gateway.list_menu_data().await?;
    Ok(Json(data))
}

pub async fn get_menu_settings_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
) -> Result<Json<MenuSettings>, ApiError> {
    let settings = gateway.menu_settings().await?;
    Ok(Json(settings))
}

pub async fn update_menu_settings_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Json(request): Json<MenuSettings>,
) -> Result<Json<MenuSettings>, ApiError> {
    info!("Operator {} updating menu settings", operator.operator_id);

    let settings = gateway
        .update_menu_settings(operator.operator_id, request)
        .await?;

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::SettingsUpdated)
            .detail(format!("{} / {}", settings.icon, settings.text))
            .build(),
    );

    Ok(Json(settings))
}
