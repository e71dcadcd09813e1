//! HTTP API server for the lnpay node.
//!
//! Every handler maps onto one [`PaymentService`] operation. Failures come back as
//! `{ "code", "message" }` with the numeric code of the [`PayError`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lnpay_core::{PaymentHash, ShortChannelId};
use lnpay_htlc::{FeeChange, ForwardFilter, ForwardState, ForwardedPayment};
use lnpay_routing::Route;
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::pay::{PayRequest, PayResponse};
use crate::service::{NodeInfo, PaymentService};
use crate::store::{PayStatusEntry, SendPayFilter, SendPayRecord};

pub struct ApiState {
    pub service: PaymentService,
}

// --- Request / response types ---

#[derive(Deserialize)]
pub struct SendPayRequest {
    pub route: Route,
    pub payment_hash: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub bolt11: Option<String>,
}

#[derive(Deserialize)]
pub struct WaitQuery {
    /// Seconds to wait before giving up.
    pub timeout: Option<u64>,
}

#[derive(Deserialize)]
pub struct ListSendPaysQuery {
    pub payment_hash: Option<String>,
    pub bolt11: Option<String>,
}

#[derive(Deserialize)]
pub struct PayStatusQuery {
    pub bolt11: Option<String>,
}

#[derive(Deserialize)]
pub struct ListForwardsQuery {
    pub in_channel: Option<String>,
    pub out_channel: Option<String>,
    pub status: Option<ForwardState>,
}

#[derive(Deserialize)]
pub struct SetChannelFeeRequest {
    pub id: String,
    #[serde(default)]
    pub base: Option<i64>,
    #[serde(default)]
    pub ppm: Option<i64>,
}

#[derive(Serialize)]
pub struct PaymentsResponse {
    pub payments: Vec<SendPayRecord>,
}

#[derive(Serialize)]
pub struct PayStatusResponse {
    pub pay: Vec<PayStatusEntry>,
}

#[derive(Serialize)]
pub struct ForwardsResponse {
    pub forwards: Vec<ForwardedPayment>,
    pub fees_collected_msat: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: PayError) -> ApiError {
    let status = match &err {
        PayError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        PayError::NoSuchPayment(_) => StatusCode::NOT_FOUND,
        PayError::InProgress(_) => StatusCode::CONFLICT,
        PayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            code: err.code(),
            message: err.to_string(),
        }),
    )
}

fn parse_scid(value: Option<String>) -> Result<Option<ShortChannelId>, ApiError> {
    value
        .map(|s| s.parse::<ShortChannelId>())
        .transpose()
        .map_err(|e| api_error(PayError::from(e)))
}

// --- Handlers ---

async fn handle_getinfo(State(state): State<Arc<ApiState>>) -> Json<NodeInfo> {
    Json(state.service.get_info().await)
}

async fn handle_pay(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PayRequest>,
) -> Result<Json<PayResponse>, ApiError> {
    state.service.pay(req).await.map(Json).map_err(api_error)
}

async fn handle_sendpay(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SendPayRequest>,
) -> Result<Json<SendPayRecord>, ApiError> {
    let payment_hash =
        PaymentHash::from_hex(&req.payment_hash).map_err(|e| api_error(e.into()))?;
    state
        .service
        .send(req.route, payment_hash, req.label, req.bolt11)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn handle_waitsendpay(
    State(state): State<Arc<ApiState>>,
    Path(hash): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<SendPayRecord>, ApiError> {
    let payment_hash = PaymentHash::from_hex(&hash).map_err(|e| api_error(e.into()))?;
    let wait = state.service.await_outcome(payment_hash);
    let result = match query.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
            .await
            .unwrap_or(Err(PayError::InProgress(payment_hash))),
        None => wait.await,
    };
    result.map(Json).map_err(api_error)
}

async fn handle_listsendpays(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListSendPaysQuery>,
) -> Result<Json<PaymentsResponse>, ApiError> {
    let payment_hash = query
        .payment_hash
        .map(|h| PaymentHash::from_hex(&h))
        .transpose()
        .map_err(|e| api_error(e.into()))?;
    let filter = SendPayFilter {
        payment_hash,
        bolt11: query.bolt11,
    };
    Ok(Json(PaymentsResponse {
        payments: state.service.list_payments(&filter),
    }))
}

async fn handle_paystatus(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PayStatusQuery>,
) -> Json<PayStatusResponse> {
    Json(PayStatusResponse {
        pay: state.service.payment_status(query.bolt11.as_deref()),
    })
}

async fn handle_listforwards(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListForwardsQuery>,
) -> Result<Json<ForwardsResponse>, ApiError> {
    let filter = ForwardFilter {
        in_channel: parse_scid(query.in_channel)?,
        out_channel: parse_scid(query.out_channel)?,
        state: query.status,
    };
    Ok(Json(ForwardsResponse {
        forwards: state.service.list_forwards(&filter),
        fees_collected_msat: state.service.fees_collected_msat(),
    }))
}

async fn handle_setchannelfee(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SetChannelFeeRequest>,
) -> Result<Json<FeeChange>, ApiError> {
    state
        .service
        .set_channel_fee(&req.id, req.base, req.ppm)
        .await
        .map(Json)
        .map_err(api_error)
}

// --- Server ---

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/getinfo", get(handle_getinfo))
        .route("/api/v1/pay", post(handle_pay))
        .route("/api/v1/sendpay", post(handle_sendpay))
        .route("/api/v1/waitsendpay/{hash}", get(handle_waitsendpay))
        .route("/api/v1/listsendpays", get(handle_listsendpays))
        .route("/api/v1/paystatus", get(handle_paystatus))
        .route("/api/v1/listforwards", get(handle_listforwards))
        .route("/api/v1/setchannelfee", post(handle_setchannelfee))
        .with_state(state)
}

pub async fn start_api_server(listen_addr: SocketAddr, state: Arc<ApiState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
