use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    repository::Reconciliation,
    service::{GatewayCallback, InvoiceCallback, PaymentRequestCallback, WebhookOutcome},
};

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
    pub data: Option<Reconciliation>,
}

fn callback_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(CALLBACK_TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

// Token before body: a bad token is a 401 whatever the payload.
fn parse_authenticated<T: DeserializeOwned>(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<T> {
    state
        .service_context
        .webhook_reconciler
        .authenticate(callback_token(headers))?;

    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))
}

async fn reconcile(state: &AppState, headers: &HeaderMap, callback: GatewayCallback) -> Result<Json<WebhookResponse>> {
    let outcome = state
        .service_context
        .webhook_reconciler
        .handle(callback_token(headers), callback)
        .await?;

    let response = match outcome {
        WebhookOutcome::TestPing => WebhookResponse {
            message: "Test webhook received".to_string(),
            data: None,
        },
        WebhookOutcome::Reconciled(reconciliation) => WebhookResponse {
            message: if reconciliation.applied {
                "Webhook processed".to_string()
            } else {
                "Webhook already processed".to_string()
            },
            data: Some(reconciliation),
        },
    };

    Ok(Json(response))
}

pub async fn invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let callback: InvoiceCallback = parse_authenticated(&state, &headers, &body)?;
    reconcile(&state, &headers, callback.into()).await
}

pub async fn payment_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let callback: PaymentRequestCallback = parse_authenticated(&state, &headers, &body)?;
    reconcile(&state, &headers, callback.into()).await
}
