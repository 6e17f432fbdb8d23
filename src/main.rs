use roomcast::config::Config;
use roomcast::{AppState, app, db};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomcast=debug,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let db_pool = db::connect(&config.database_url).await?;
    db::init_schema(&db_pool).await?;

    let state = AppState::new(db_pool);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
