use std::net::SocketAddr;
use std::sync::Arc;

use dealer_approvals::config::AppConfig;
use dealer_approvals::events::start_activity_listener;
use dealer_approvals::jwt::JwtConfig;
use dealer_approvals::{create_app, docs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    let jwt = JwtConfig::from_env()?;
    let state = AppState::from_config(&config, jwt).await?;

    tokio::spawn(start_activity_listener(state.events.subscribe()));

    let trigger = Arc::clone(&state.migration);
    let changes = state.store.subscribe();
    tokio::spawn(async move { trigger.run(changes).await });

    let openapi = docs::build_openapi(config.port)?;
    let app = create_app(state).merge(docs::swagger_routes(openapi)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    tracing::info!("swagger ui available at http://localhost:{}/docs", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
