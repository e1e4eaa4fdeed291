use actix_web::{web, App, HttpServer};
use board_chat_service::{
    auth::RedisSessionStore,
    config, db,
    directory::PgIdentityDirectory,
    error, logging,
    fanout::{listener::run_pubsub_listener, RedisBroker},
    metrics::MetricsMiddleware,
    middleware::{CredentialMiddleware, RequestIdMiddleware},
    redis_client::RedisClient,
    routes,
    state::AppState,
    store::PgConversationStore,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url, cfg.db_max_connections)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    let redis = RedisClient::from_url(&cfg.redis_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;

    let state = AppState::new(
        cfg.clone(),
        Arc::new(RedisSessionStore::new(redis.clone())),
        Arc::new(PgIdentityDirectory::new(db.clone())),
        Arc::new(PgConversationStore::new(db.clone())),
        Arc::new(RedisBroker::new(redis.clone())),
    );

    // Cross-instance fan-out: every instance consumes the shared channel
    let listener = tokio::spawn(run_pubsub_listener(redis.client(), state.bridge.clone()));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(
        %bind_addr,
        channel = %cfg.chat_channel,
        policy = ?cfg.ws.unauthenticated_policy,
        "starting board-chat-service"
    );

    let rest_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(CredentialMiddleware::new(rest_state.authority.clone()))
            .wrap(MetricsMiddleware)
            .wrap(RequestIdMiddleware)
            .wrap(cors)
            .app_data(web::Data::new(rest_state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run();

    let result = server
        .await
        .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")));

    listener.abort();
    tracing::info!("board-chat-service stopped");
    result
}
