use std::sync::Arc;

use axum::Router;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    validate_request::ValidateRequestHeaderLayer,
};

use crate::service::WalletService;

use self::auth::AuthService;

pub mod auth;
pub mod utils;
pub mod wallet;

pub fn app_router(auth: Arc<AuthService>, wallets: Arc<WalletService>) -> Router {
    let head_route = Router::new();

    let auth_routes = auth::auth_routes(auth.clone());
    let wallet_routes = wallet::wallet_routes(auth, wallets)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"))
        .route_layer(CompressionLayer::new().gzip(true));

    head_route
        .nest("/api", auth_routes.merge(wallet_routes))
        .layer(RequestBodyLimitLayer::new(1024 * 10)) //10KB limit
        .layer(TraceLayer::new_for_http())
}
