use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::PermissionResolver;
use crate::config::AppConfig;
use crate::db;
use crate::errors::AppResult;
use crate::events::{init_event_bus, EventBus};
use crate::geo::GeographicScope;
use crate::jwt::JwtConfig;
use crate::migration::AutoMigrationTrigger;
use crate::notifications::{InAppTransport, NotificationDispatcher};
use crate::routes::{approvals, authz, health, notifications};
use crate::store::{DocumentStore, MemoryStore, SqliteStore};
use crate::workflow::ApprovalWorkflow;

#[derive(Clone)]
pub struct AppState {
    pub jwt: Arc<JwtConfig>,
    pub store: Arc<dyn DocumentStore>,
    /// Present when the store is SQLite-backed.
    pub pool: Option<SqlitePool>,
    pub resolver: Arc<PermissionResolver>,
    pub workflow: ApprovalWorkflow,
    pub notifications: NotificationDispatcher,
    pub migration: Arc<AutoMigrationTrigger>,
    pub events: EventBus,
}

impl AppState {
    /// Wire the engine around an existing store.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        pool: Option<SqlitePool>,
        config: &AppConfig,
        jwt: JwtConfig,
    ) -> AppResult<Self> {
        let registry = Arc::new(config.load_registry()?);
        let directory = config.load_directory()?;
        let scope = Arc::new(GeographicScope::new(directory.clone()));
        let users = Arc::new(config.load_users(Arc::clone(&scope))?);
        let resolver = Arc::new(PermissionResolver::new(registry, Arc::clone(&scope)));

        let (events, _) = init_event_bus();
        let notifications = NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::new(InAppTransport::new(events.clone())),
            config.notification_timeout,
        );
        let workflow = ApprovalWorkflow::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            notifications.clone(),
            users,
            events.clone(),
        );
        let migration = Arc::new(AutoMigrationTrigger::new(
            Arc::clone(&store),
            Arc::new(directory),
            config.governed_collections.clone(),
        ));

        Ok(Self {
            jwt: Arc::new(jwt),
            store,
            pool,
            resolver,
            workflow,
            notifications,
            migration,
            events,
        })
    }

    /// SQLite when `DATABASE_URL` is set, otherwise the in-memory store.
    pub async fn from_config(config: &AppConfig, jwt: JwtConfig) -> anyhow::Result<Self> {
        let state = match &config.database_url {
            Some(url) => {
                let pool = db::init(url).await?;
                let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool.clone()));
                Self::new(store, Some(pool), config, jwt)?
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using the in-memory document store");
                Self::new(Arc::new(MemoryStore::new()), None, config, jwt)?
            }
        };
        Ok(state)
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let approval_routes = Router::new()
        .route("/", get(approvals::list_approvals).post(approvals::create_approval))
        .route("/assigned", get(approvals::list_assigned))
        .route("/:id", get(approvals::get_approval))
        .route("/:id/audit", get(approvals::get_audit_trail))
        .route("/:id/decision", post(approvals::decide))
        .route("/:id/cancel", post(approvals::cancel));

    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/:id/read", post(notifications::mark_read));

    Router::new()
        .route("/api/health", get(health::health))
        .route("/authz/can", post(authz::can))
        .route("/scope", get(authz::scope))
        .nest("/approvals", approval_routes)
        .nest("/notifications", notification_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
