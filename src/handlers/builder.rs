use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::builder::{ActionDispatcher, BuilderSessions, BuilderState, BuilderView, BulkOutcome};
use crate::database::{MenuData, MenuGateway};
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::security::AuthenticatedOperator;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct ViewDto {
    pub view: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
}

impl From<BuilderView> for ViewDto {
    fn from(view: BuilderView) -> Self {
        match view {
            BuilderView::Menu | BuilderView::AllLabels | BuilderView::AllCategories => ViewDto {
                view: view.as_str(),
                label_id: None,
                category_id: None,
            },
            BuilderView::Label { label_id } => ViewDto {
                view: view.as_str(),
                label_id: Some(label_id),
                category_id: None,
            },
            BuilderView::Category {
                label_id,
                category_id,
            } => ViewDto {
                view: view.as_str(),
                label_id,
                category_id: Some(category_id),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub view: ViewDto,
    pub selection: Vec<Uuid>,
    pub expanded: Vec<Uuid>,
    pub history_len: usize,
    pub future_len: usize,
    pub data: MenuData,
}

fn session_response(session_id: Uuid, state: &BuilderState) -> SessionResponse {
    SessionResponse {
        session_id,
        view: state.view().into(),
        selection: state.selection().iter().copied().collect(),
        expanded: state.expanded().iter().copied().collect(),
        history_len: state.history_len(),
        future_len: state.future_len(),
        data: state.data().clone(),
    }
}

/// A session belongs to the operator that opened it.
fn require_owner(
    session: &crate::builder::BuilderSession,
    operator: &AuthenticatedOperator,
) -> Result<(), ApiError> {
    if session.operator != operator.operator_id {
        return Err(ApiError::Forbidden(
            "builder session belongs to another operator".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_session_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
) -> Result<Json<SessionResponse>, ApiError> {
    let data = gateway.list_menu_data().await?;
    let session_id = sessions.create(operator.operator_id, data);

    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::SessionCreated)
            .session(session_id)
            .build(),
    );

    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let session = handle.lock().await;
    Ok(Json(session_response(session_id, &session.state)))
}

pub async fn get_session_handler(
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();
    Ok(Json(session_response(session_id, &session.state)))
}

pub async fn close_session_handler(
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<super::labels::OkResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    {
        let session = handle.lock().await;
        require_owner(&session, &operator)?;
    }
    sessions.remove(session_id);
    Ok(Json(super::labels::OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "go", rename_all = "kebab-case")]
pub enum NavigateRequest {
    Menu,
    AllLabels,
    AllCategories,
    Label { label_id: Uuid },
    Category { category_id: Uuid },
    Back,
}

pub async fn navigate_handler(
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<NavigateRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    match request {
        NavigateRequest::Menu => session.state.navigate_to_view(BuilderView::Menu),
        NavigateRequest::AllLabels => session.state.navigate_to_view(BuilderView::AllLabels),
        NavigateRequest::AllCategories => {
            session.state.navigate_to_view(BuilderView::AllCategories)
        }
        NavigateRequest::Label { label_id } => session.state.navigate_to_label(label_id),
        NavigateRequest::Category { category_id } => {
            session.state.navigate_to_category(category_id)
        }
        NavigateRequest::Back => session.state.navigate_back(),
    }

    Ok(Json(session_response(session_id, &session.state)))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum SelectionRequest {
    Toggle { id: Uuid },
    Set { ids: Vec<Uuid> },
    Clear,
}

pub async fn selection_handler(
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    match request {
        SelectionRequest::Toggle { id } => session.state.toggle_selection(id),
        SelectionRequest::Set { ids } => session.state.select_all(ids),
        SelectionRequest::Clear => session.state.clear_selection(),
    }

    Ok(Json(session_response(session_id, &session.state)))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ExpansionRequest {
    Toggle { id: Uuid },
    ExpandAll { ids: Vec<Uuid> },
    CollapseAll,
}

pub async fn expansion_handler(
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ExpansionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    match request {
        ExpansionRequest::Toggle { id } => session.state.toggle_expand(id),
        ExpansionRequest::ExpandAll { ids } => session.state.expand_all(ids),
        ExpansionRequest::CollapseAll => session.state.collapse_all(),
    }

    Ok(Json(session_response(session_id, &session.state)))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "verb", rename_all = "kebab-case")]
pub enum ActionRequest {
    Clone,
    Remove,
    ToggleVisibility,
    Reorder { ordered_ids: Vec<Uuid> },
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub outcome: BulkOutcome,
    pub session: SessionResponse,
}

/// Apply a bulk verb to the session's current selection. The per-session
/// lock keeps a repeated submission of an in-flight action queued behind
/// the first.
pub async fn action_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    let dispatcher = ActionDispatcher::new(gateway, operator.operator_id);

    let (verb, outcome) = match request {
        ActionRequest::Clone => ("clone", dispatcher.clone_selected(&mut session.state).await?),
        ActionRequest::Remove => ("remove", dispatcher.remove_selected(&mut session.state).await?),
        ActionRequest::ToggleVisibility => (
            "toggle-visibility",
            dispatcher.toggle_visibility(&mut session.state).await?,
        ),
        ActionRequest::Reorder { ordered_ids } => {
            dispatcher.reorder(&mut session.state, ordered_ids).await?;
            ("reorder", BulkOutcome::default())
        }
    };

    info!(
        "Session {}: {} ({} ok, {} failed)",
        session_id,
        verb,
        outcome.succeeded(),
        outcome.failed_count()
    );
    logger.log(
        ActivityLog::builder(operator.operator_id, ActivityType::BulkActionDispatched)
            .session(session_id)
            .detail(format!(
                "{verb}: {} ok, {} failed",
                outcome.succeeded(),
                outcome.failed_count()
            ))
            .build(),
    );

    let session_view = session_response(session_id, &session.state);
    Ok(Json(ActionResponse {
        outcome,
        session: session_view,
    }))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Description of the entry that was applied; absent when the stack
    /// was empty.
    pub applied: Option<String>,
    pub session: SessionResponse,
}

pub async fn undo_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    let dispatcher = ActionDispatcher::new(gateway, operator.operator_id);
    let applied = dispatcher.undo(&mut session.state).await?;

    if let Some(description) = &applied {
        logger.log(
            ActivityLog::builder(operator.operator_id, ActivityType::UndoApplied)
                .session(session_id)
                .detail(description.clone())
                .build(),
        );
    }

    let session_view = session_response(session_id, &session.state);
    Ok(Json(HistoryResponse {
        applied,
        session: session_view,
    }))
}

pub async fn redo_handler(
    Extension(gateway): Extension<Arc<dyn MenuGateway>>,
    Extension(sessions): Extension<Arc<BuilderSessions>>,
    Extension(logger): Extension<ActivityLogger>,
    Extension(operator): Extension<AuthenticatedOperator>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let handle = sessions.get(session_id).map_err(ApiError::from)?;
    let mut session = handle.lock().await;
    require_owner(&session, &operator)?;
    session.touch();

    let dispatcher = ActionDispatcher::new(gateway, operator.operator_id);
    let applied = dispatcher.redo(&mut session.state).await?;

    if let Some(description) = &applied {
        logger.log(
            ActivityLog::builder(operator.operator_id, ActivityType::RedoApplied)
                .session(session_id)
                .detail(description.clone())
                .build(),
        );
    }

    let session_view = session_response(session_id, &session.state);
    Ok(Json(HistoryResponse {
        applied,
        session: session_view,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigate_requests_deserialize_from_their_wire_shape() {
        let label_id = Uuid::new_v4();
        let request: NavigateRequest = serde_json::from_value(serde_json::json!({
            "go": "label",
            "label_id": label_id,
        }))
        .unwrap();
        assert!(matches!(request, NavigateRequest::Label { label_id: id } if id == label_id));

        let request: NavigateRequest =
            serde_json::from_value(serde_json::json!({ "go": "back" })).unwrap();
        assert!(matches!(request, NavigateRequest::Back));
    }

    #[test]
    fn action_requests_deserialize_from_their_wire_shape() {
        let request: ActionRequest =
            serde_json::from_value(serde_json::json!({ "verb": "toggle-visibility" })).unwrap();
        assert!(matches!(request, ActionRequest::ToggleVisibility));

        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let request: ActionRequest = serde_json::from_value(serde_json::json!({
            "verb": "reorder",
            "ordered_ids": ids.clone(),
        }))
        .unwrap();
        assert!(matches!(request, ActionRequest::Reorder { ordered_ids } if ordered_ids == ids));
    }

    #[test]
    fn view_dto_carries_the_ids_of_parameterized_views() {
        let label_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();
        let dto: ViewDto = BuilderView::Category {
            label_id: Some(label_id),
            category_id,
        }
        .into();
        assert_eq!(dto.view, "category");
        assert_eq!(dto.label_id, Some(label_id));
        assert_eq!(dto.category_id, Some(category_id));

        let dto: ViewDto = BuilderView::Menu.into();
        assert_eq!(dto.view, "menu");
        assert!(dto.label_id.is_none());
    }
}
