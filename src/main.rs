use anyhow::Result;
use axum::{
    middleware,
    routing::{get, patch, post, put},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod builder;
mod config;
mod database;
mod handlers;
mod logging;
mod ordering;
mod security;
mod utils;

use builder::BuilderSessions;
use config::Settings;
use database::{DbPool, MenuGateway, PgMenuGateway};
use logging::{ActivityLogger, LoggerConfig};
use security::{CustomHeaderValidator, MenuAuthorization, StaticPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (stdout + daily rolling file)
    let file_appender = tracing_appender::rolling::daily("logs", "menu-api-server.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,menu_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_writer(file_writer.and(std::io::stdout))
        .json()
        .init();

    info!("🚀 Starting Menu API Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");

    // Authorization policy for menu mutations
    let auth = MenuAuthorization::new(Arc::new(StaticPolicy::new(
        settings.security.allowed_operators.clone(),
    )));

    // Menu data gateway (the sole write path to menu storage)
    let pg_gateway = PgMenuGateway::new(
        db_pool.clone(),
        auth,
        settings.menu.name_retry_max_attempts,
    );
    pg_gateway.ensure_schema().await?;
    let gateway: Arc<dyn MenuGateway> = Arc::new(pg_gateway);
    info!("✅ Menu schema ensured");

    // Mutation audit logger
    ActivityLogger::ensure_table(db_pool.get_pool()).await?;
    let activity_logger = ActivityLogger::new(db_pool.get_pool().clone(), LoggerConfig::default());

    // Builder session registry
    let sessions = Arc::new(BuilderSessions::new(Duration::from_secs(
        settings.menu.session_ttl_minutes * 60,
    )));
    sessions.clone().start_sweeper(Duration::from_secs(60));
    info!("✅ Builder session registry started");

    // Request authentication
    let header_validator = Arc::new(CustomHeaderValidator::new(
        settings.security.custom_headers.app_id.clone(),
        settings.security.custom_headers.api_key.clone(),
        settings.security.custom_headers.request_signature == "enabled",
        settings.security.custom_headers.timestamp_tolerance,
    ));

    // Build router
    let app = build_router(gateway, sessions, activity_logger, header_validator);

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(
    gateway: Arc<dyn MenuGateway>,
    sessions: Arc<BuilderSessions>,
    activity_logger: ActivityLogger,
    header_validator: Arc<CustomHeaderValidator>,
) -> Router {
    // Public routes (no security)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    // Protected routes (security middleware resolves the operator)
    let protected_routes = Router::new()
        // menu snapshot + settings
        .route("/api/menu", get(handlers::menu::list_menu_handler))
        .route(
            "/api/menu/settings",
            get(handlers::menu::get_menu_settings_handler)
                .put(handlers::menu::update_menu_settings_handler),
        )
        // categories
        .route("/api/categories", post(handlers::categories::create_category_handler))
        .route(
            "/api/categories/new",
            post(handlers::categories::create_new_category_handler),
        )
        .route(
            "/api/categories/{id}",
            patch(handlers::categories::update_category_handler)
                .delete(handlers::categories::delete_category_handler),
        )
        .route(
            "/api/categories/{id}/clone",
            post(handlers::categories::clone_category_handler),
        )
        // products within a category
        .route(
            "/api/categories/{id}/products/reorder",
            post(handlers::products::reorder_category_products_handler),
        )
        .route(
            "/api/categories/{id}/products/{product_id}",
            put(handlers::products::attach_product_handler)
                .delete(handlers::products::detach_product_handler),
        )
        // labels
        .route("/api/labels", post(handlers::labels::create_label_handler))
        .route("/api/labels/reorder", post(handlers::labels::reorder_labels_handler))
        .route(
            "/api/labels/{id}",
            patch(handlers::labels::update_label_handler)
                .delete(handlers::labels::delete_label_handler),
        )
        .route(
            "/api/labels/{id}/auto-sort",
            post(handlers::labels::auto_sort_label_handler),
        )
        .route(
            "/api/labels/{id}/categories/reorder",
            post(handlers::labels::reorder_label_categories_handler),
        )
        .route(
            "/api/labels/{id}/categories/{category_id}",
            put(handlers::labels::attach_category_handler)
                .delete(handlers::labels::detach_category_handler),
        )
        // builder sessions
        .route(
            "/api/builder/sessions",
            post(handlers::builder::create_session_handler),
        )
        .route(
            "/api/builder/sessions/{id}",
            get(handlers::builder::get_session_handler)
                .delete(handlers::builder::close_session_handler),
        )
        .route(
            "/api/builder/sessions/{id}/navigate",
            post(handlers::builder::navigate_handler),
        )
        .route(
            "/api/builder/sessions/{id}/selection",
            post(handlers::builder::selection_handler),
        )
        .route(
            "/api/builder/sessions/{id}/expansion",
            post(handlers::builder::expansion_handler),
        )
        .route(
            "/api/builder/sessions/{id}/actions",
            post(handlers::builder::action_handler),
        )
        .route(
            "/api/builder/sessions/{id}/undo",
            post(handlers::builder::undo_handler),
        )
        .route(
            "/api/builder/sessions/{id}/redo",
            post(handlers::builder::redo_handler),
        )
        .layer(middleware::from_fn(security::middleware::security_middleware))
        .layer(Extension(header_validator));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Shared state
        .layer(Extension(gateway))
        .layer(Extension(sessions))
        .layer(Extension(activity_logger))
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CatchPanicLayer::new())
}
