use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::db::tx::{Transaction, TransactionStatus, TransactionType};
use crate::error::ServiceError;
use crate::service::WalletService;

use super::{auth::AuthService, utils};

type WalletState = State<(Arc<AuthService>, Arc<WalletService>)>;

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_user_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
    #[serde(rename = "type", default, deserialize_with = "empty_as_none")]
    pub kind: Option<TransactionType>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct TransactionHistoryResponse {
    pub transactions: Vec<Transaction>,
}

// `?type=` means no filter, anything else must be a known label
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn authenticate(headers: &HeaderMap, service: &AuthService) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    utils::validate_auth_token(headers, service).map_err(|status| {
        tracing::warn!("Token validation failed: {status}");
        (status, Json(serde_json::json!({ "error": "Invalid token" })))
    })
}

async fn deposit(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let payload = utils::json_body(payload).map_err(IntoResponse::into_response)?;
    let balance = wallets
        .deposit(user_id, payload.amount)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(BalanceResponse { balance })))
}

async fn withdraw(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let payload = utils::json_body(payload).map_err(IntoResponse::into_response)?;
    let balance = wallets
        .withdraw(user_id, payload.amount)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(BalanceResponse { balance })))
}

async fn transfer(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let payload = utils::json_body(payload).map_err(IntoResponse::into_response)?;
    let balance = wallets
        .transfer(user_id, payload.to_user_id, payload.amount)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(BalanceResponse { balance })))
}

async fn get_balance(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let balance = wallets
        .get_balance(user_id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(BalanceResponse { balance })))
}

// return a page of transactions which involve the caller
async fn list_transactions(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let Query(params) = params.map_err(|rejection| {
        ServiceError::bad_request(rejection.body_text()).into_response()
    })?;

    let transactions = wallets
        .get_transaction_history(user_id, params.page, params.page_size, params.kind, params.status)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(TransactionHistoryResponse { transactions })))
}

// return a specific transaction by it's transaction_id which belongs to it's user
async fn get_transaction(
    headers: HeaderMap,
    State((auth, wallets)): WalletState,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let user_id = authenticate(&headers, &auth).map_err(IntoResponse::into_response)?;
    let transaction = wallets
        .get_transaction(user_id, transaction_id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(transaction)))
}

pub fn wallet_routes(auth: Arc<AuthService>, wallets: Arc<WalletService>) -> Router {
    Router::new()
        .route("/deposit", post(deposit))
        .route("/withdraw", post(withdraw))
        .route("/transfer", post(transfer))
        .route("/balance", get(get_balance))
        .route("/transactions", get(list_transactions))
        .route("/transactions/:id", get(get_transaction))
        .with_state((auth, wallets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<HistoryParams, String> {
        let uri: axum::http::Uri = format!("/transactions?{query}").parse().unwrap();
        Query::<HistoryParams>::try_from_uri(&uri)
            .map(|Query(params)| params)
            .map_err(|rejection| rejection.body_text())
    }

    #[test]
    fn empty_filters_mean_no_filter() {
        let params = parse("page=1&page_size=10&type=&status=").unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 10);
        assert_eq!(params.kind, None);
        assert_eq!(params.status, None);
    }

    #[test]
    fn missing_params_default_to_zero_and_none() {
        let params = parse("").unwrap();
        assert_eq!(params.page, 0);
        assert_eq!(params.page_size, 0);
        assert_eq!(params.kind, None);
    }

    #[test]
    fn known_filters_parse_and_unknown_are_rejected() {
        let params = parse("type=transfer&status=success").unwrap();
        assert_eq!(params.kind, Some(TransactionType::Transfer));
        assert_eq!(params.status, Some(TransactionStatus::Success));

        assert!(parse("type=refund").is_err());
        assert!(parse("status=done").is_err());
    }
}
