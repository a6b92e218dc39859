//! End-to-end builder flows against the in-memory gateway: bulk verbs,
//! optimistic snapshots, and undo/redo across the dispatcher.

use std::sync::Arc;

use uuid::Uuid;

use crate::builder::{ActionDispatcher, BuilderSessions, BuilderState, BuilderView};
use crate::database::{
    CreateCategory, CreateLabel, MemoryMenuGateway, MenuGateway, OperatorId, UpdateCategory,
};
use crate::security::{MenuAuthorization, StaticPolicy};
use crate::utils::slugify;

const OPERATOR: OperatorId = 7;

fn open_gateway() -> Arc<MemoryMenuGateway> {
    Arc::new(MemoryMenuGateway::new(MenuAuthorization::new(Arc::new(
        StaticPolicy::allow_all(),
    ))))
}

async fn make_label(gateway: &MemoryMenuGateway, name: &str) -> Uuid {
    gateway
        .create_label(
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

async fn make_category(gateway: &MemoryMenuGateway, name: &str, label_ids: Vec<Uuid>) -> Uuid {
    gateway
        .create_category(
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

async fn fresh_state(gateway: &MemoryMenuGateway) -> BuilderState {
    BuilderState::new(gateway.list_menu_data().await.unwrap())
}

#[tokio::test]
async fn bulk_clone_reports_per_item_outcome_on_partial_failure() {
    // A retry budget of one attempt makes a pre-existing "<name> copy" slug
    // an unrecoverable collision, exactly like a raced operator.
    let gateway = Arc::new(
        MemoryMenuGateway::new(MenuAuthorization::new(Arc::new(StaticPolicy::allow_all())))
            .with_name_retry_budget(1),
    );
    let cat_a = make_category(&gateway, "Americano", vec![]).await;
    let cat_b = make_category(&gateway, "Blends", vec![]).await;
    let cat_c = make_category(&gateway, "Cortado", vec![]).await;
    make_category(&gateway, "Blends copy", vec![]).await; // the landmine

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_view(BuilderView::AllCategories);
    state.select_all([cat_a, cat_b, cat_c]);

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    let outcome = dispatcher.clone_selected(&mut state).await.unwrap();

    assert_eq!(outcome.items.len(), 3);
    assert_eq!(outcome.succeeded(), 2);
    let failed: Vec<Uuid> = outcome
        .items
        .iter()
        .filter(|item| !item.ok)
        .map(|item| item.id)
        .collect();
    assert_eq!(failed, vec![cat_b]);

    // Exactly the two successful clones were persisted.
    let data = gateway.list_menu_data().await.unwrap();
    assert_eq!(data.categories.len(), 6);
    assert!(data.categories.iter().any(|c| c.name == "Americano copy"));
    assert!(data.categories.iter().any(|c| c.name == "Cortado copy"));

    // One undo removes both clones in one step.
    assert_eq!(state.history_len(), 1);
    dispatcher.undo(&mut state).await.unwrap();
    let data = gateway.list_menu_data().await.unwrap();
    assert_eq!(data.categories.len(), 4);
    assert!(!data.categories.iter().any(|c| c.name == "Americano copy"));
}

#[tokio::test]
async fn undo_after_mixed_visibility_toggle_restores_every_prior_value() {
    let gateway = open_gateway();
    let mut ids = Vec::new();
    for name in ["One", "Two", "Three", "Four", "Five"] {
        ids.push(make_category(&gateway, name, vec![]).await);
    }
    // Start mixed: two of five hidden.
    for id in [ids[1], ids[3]] {
        gateway
            .update_category(
                OPERATOR,
                UpdateCategory {
                    id,
                    name: None,
                    slug: None,
                    label_ids: None,
                    is_visible: Some(false),
                },
            )
            .await
            .unwrap();
    }

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_view(BuilderView::AllCategories);
    state.select_all(ids.clone());

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher.toggle_visibility(&mut state).await.unwrap();

    // Any-hidden resolves to all-visible.
    let data = gateway.list_menu_data().await.unwrap();
    assert!(data.categories.iter().all(|c| c.is_visible));

    // One undo step brings back the mixed pattern.
    dispatcher.undo(&mut state).await.unwrap();
    let data = gateway.list_menu_data().await.unwrap();
    let visible: Vec<bool> = ids
        .iter()
        .map(|id| data.categories.iter().find(|c| c.id == *id).unwrap().is_visible)
        .collect();
    assert_eq!(visible, vec![true, false, true, false, true]);
}

#[tokio::test]
async fn reorder_round_trips_through_undo_and_redo() {
    let gateway = open_gateway();
    let label_id = make_label(&gateway, "Drinks").await;
    let cat_a = make_category(&gateway, "Americano", vec![label_id]).await;
    let cat_b = make_category(&gateway, "Blends", vec![label_id]).await;
    let cat_c = make_category(&gateway, "Cortado", vec![label_id]).await;

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_label(label_id);

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher
        .reorder(&mut state, vec![cat_c, cat_a, cat_b])
        .await
        .unwrap();

    let members_of = |data: &crate::database::MenuData| -> Vec<Uuid> {
        data.labels
            .iter()
            .find(|l| l.id == label_id)
            .unwrap()
            .categories
            .iter()
            .map(|c| c.id)
            .collect()
    };

    assert_eq!(members_of(&gateway.list_menu_data().await.unwrap()), vec![cat_c, cat_a, cat_b]);
    // The optimistic snapshot already shows the new order.
    assert_eq!(members_of(state.data()), vec![cat_c, cat_a, cat_b]);

    dispatcher.undo(&mut state).await.unwrap();
    assert_eq!(members_of(&gateway.list_menu_data().await.unwrap()), vec![cat_a, cat_b, cat_c]);

    dispatcher.redo(&mut state).await.unwrap();
    assert_eq!(members_of(&gateway.list_menu_data().await.unwrap()), vec![cat_c, cat_a, cat_b]);
}

#[tokio::test]
async fn reorder_with_a_stale_id_set_is_rejected_before_any_write() {
    let gateway = open_gateway();
    let label_id = make_label(&gateway, "Drinks").await;
    let cat_a = make_category(&gateway, "Americano", vec![label_id]).await;
    let _cat_b = make_category(&gateway, "Blends", vec![label_id]).await;

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_label(label_id);

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    let err = dispatcher.reorder(&mut state, vec![cat_a]).await.unwrap_err();
    assert!(matches!(err, crate::database::MenuError::Validation { .. }));

    // Neither the snapshot nor the store moved, and nothing was recorded.
    assert_eq!(state.history_len(), 0);
    let data = gateway.list_menu_data().await.unwrap();
    let positions: Vec<i32> = data
        .labels
        .iter()
        .find(|l| l.id == label_id)
        .unwrap()
        .categories
        .iter()
        .map(|c| c.position)
        .collect();
    assert_eq!(positions, vec![0, 1]);
}

#[tokio::test]
async fn remove_in_a_label_view_detaches_and_undo_restores_the_order() {
    let gateway = open_gateway();
    let label_id = make_label(&gateway, "Drinks").await;
    let cat_a = make_category(&gateway, "Americano", vec![label_id]).await;
    let cat_b = make_category(&gateway, "Blends", vec![label_id]).await;
    let cat_c = make_category(&gateway, "Cortado", vec![label_id]).await;

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_label(label_id);
    state.select_all([cat_a, cat_c]);

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher.remove_selected(&mut state).await.unwrap();

    let data = gateway.list_menu_data().await.unwrap();
    let members: Vec<Uuid> = data
        .labels
        .iter()
        .find(|l| l.id == label_id)
        .unwrap()
        .categories
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(members, vec![cat_b]);
    // The category itself survives; only the membership went away.
    assert!(data.categories.iter().any(|c| c.id == cat_a));

    dispatcher.undo(&mut state).await.unwrap();
    let data = gateway.list_menu_data().await.unwrap();
    let members: Vec<(Uuid, i32)> = data
        .labels
        .iter()
        .find(|l| l.id == label_id)
        .unwrap()
        .categories
        .iter()
        .map(|c| (c.id, c.position))
        .collect();
    assert_eq!(members, vec![(cat_a, 0), (cat_b, 1), (cat_c, 2)]);
}

#[tokio::test]
async fn remove_on_menu_labels_hides_instead_of_deleting() {
    let gateway = open_gateway();
    let drinks = make_label(&gateway, "Drinks").await;
    let seasonal = make_label(&gateway, "Seasonal").await;

    let mut state = fresh_state(&gateway).await;
    state.select_all([drinks, seasonal]); // menu view selects labels

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher.remove_selected(&mut state).await.unwrap();

    let data = gateway.list_menu_data().await.unwrap();
    assert_eq!(data.labels.len(), 2);
    assert!(data.labels.iter().all(|l| !l.is_visible));

    dispatcher.undo(&mut state).await.unwrap();
    let data = gateway.list_menu_data().await.unwrap();
    assert!(data.labels.iter().all(|l| l.is_visible));
}

#[tokio::test]
async fn failed_undo_keeps_the_entry_on_the_history_stack() {
    // Writes allowed for operator 7 only; the undo below runs as another
    // operator and must be refused without losing the entry.
    let auth = MenuAuthorization::new(Arc::new(StaticPolicy::new(vec![OPERATOR])));
    let gateway = Arc::new(MemoryMenuGateway::new(auth));
    let label_id = {
        gateway
            .create_label(
                OPERATOR,
                CreateLabel {
                    name: "Drinks".to_string(),
                    icon: None,
                    after_label_id: None,
                },
            )
            .await
            .unwrap()
            .id
    };
    let cat_a = make_category(&gateway, "Americano", vec![label_id]).await;
    let cat_b = make_category(&gateway, "Blends", vec![label_id]).await;

    let mut state = fresh_state(&gateway).await;
    state.navigate_to_label(label_id);

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher
        .reorder(&mut state, vec![cat_b, cat_a])
        .await
        .unwrap();
    assert_eq!(state.history_len(), 1);

    let intruder = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, 99);
    let err = intruder.undo(&mut state).await.unwrap_err();
    assert!(matches!(err, crate::database::MenuError::Unauthorized(99)));

    // The entry survived, so the rightful operator can still undo.
    assert_eq!(state.history_len(), 1);
    dispatcher.undo(&mut state).await.unwrap();
    assert_eq!(state.history_len(), 0);
    assert_eq!(state.future_len(), 1);
}

#[tokio::test]
async fn session_registry_runs_the_whole_flow_per_tab() {
    let gateway = open_gateway();
    let label_id = make_label(&gateway, "Drinks").await;
    let cat = make_category(&gateway, "Americano", vec![label_id]).await;

    let sessions = BuilderSessions::new(std::time::Duration::from_secs(3600));
    let data = gateway.list_menu_data().await.unwrap();
    let session_id = sessions.create(OPERATOR, data);

    let handle = sessions.get(session_id).unwrap();
    let mut session = handle.lock().await;
    session.state.navigate_to_label(label_id);
    session.state.toggle_selection(cat);
    assert_eq!(session.state.view(), BuilderView::Label { label_id });

    let dispatcher = ActionDispatcher::new(gateway.clone() as Arc<dyn MenuGateway>, OPERATOR);
    dispatcher.remove_selected(&mut session.state).await.unwrap();
    assert!(session.state.selection().is_empty());
    assert_eq!(session.state.history_len(), 1);

    // A second tab sees its own blank state, never the first tab's history.
    drop(session);
    let other_id = sessions.create(OPERATOR, gateway.list_menu_data().await.unwrap());
    let other = sessions.get(other_id).unwrap();
    let other_session = other.lock().await;
    assert_eq!(other_session.state.history_len(), 0);
}
