use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Order, WorkStatus},
    error::{AppError, Result},
    service::{CancellationReceipt, CheckoutReceipt, CheckoutRequest, OrderDetails},
};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn new(message: &str, data: T) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            data,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkStatusRequest {
    pub work_status: String,
}

pub async fn checkout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutReceipt>>)> {
    let receipt = state
        .service_context
        .order_service
        .checkout(&user.actor, request)
        .await?;

    Ok((StatusCode::CREATED, ApiResponse::new("Order created", receipt)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetails>>> {
    let details = state
        .service_context
        .order_service
        .get_order(&user.actor, id)
        .await?;

    Ok(ApiResponse::new("Order found", details))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelOrderRequest>>,
) -> Result<Json<ApiResponse<CancellationReceipt>>> {
    let reason = request.and_then(|Json(r)| r.reason);
    let receipt = state
        .service_context
        .order_service
        .cancel_order(&user.actor, id, reason)
        .await?;

    Ok(ApiResponse::new("Order cancelled", receipt))
}

pub async fn update_work_status(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<WorkStatusRequest>,
) -> Result<Json<ApiResponse<Order>>> {
    let work_status = WorkStatus::parse(&request.work_status)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown work status {}", request.work_status)))?;

    let order = state
        .service_context
        .order_service
        .update_work_status(&user.actor, id, work_status)
        .await?;

    Ok(ApiResponse::new("Work status updated", order))
}
