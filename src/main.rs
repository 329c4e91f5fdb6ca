use std::process;
use std::sync::Arc;

use tokio::net::TcpListener;
use uuid::Uuid;

use wallet_ledger::cache::TtlCache;
use wallet_ledger::config::Config;
use wallet_ledger::db::{auth::AuthRepository, postgres::{self, PgStore}, Transaction};
use wallet_ledger::routes::{self, auth::{AuthService, TokenIssuer}};
use wallet_ledger::service::WalletService;
use wallet_ledger::telemetry;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // the guards flush buffered log lines, keep them until shutdown
    let _guards = match telemetry::init(&config.log_file) {
        Ok(guards) => guards,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };

    let database_pool = match postgres::connect(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            if let Ok(addr) = listener.local_addr() {
                tracing::info!("Listening on port: {}", addr.port());
            }
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    // created once and shared by reference with the wallet core
    let history_cache: Arc<TtlCache<Uuid, Vec<Transaction>>> = Arc::new(TtlCache::new());
    let _sweeper = history_cache.spawn_sweeper(config.cache_sweep_interval);

    let wallets = Arc::new(
        WalletService::new(Arc::new(PgStore::new(database_pool.clone())), history_cache)
            .with_history_ttl(config.history_cache_ttl),
    );
    let auth = Arc::new(AuthService::new(
        AuthRepository::new(database_pool),
        TokenIssuer::new(config.jwt_secret.clone(), config.token_ttl),
    ));

    let router = routes::app_router(auth, wallets);
    tracing::info!("Routes constructed successfully");

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}
