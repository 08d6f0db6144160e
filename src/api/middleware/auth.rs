use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    domain::{Actor, Role},
    error::AppError,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const WORKSHOP_ID_HEADER: &str = "x-workshop-id";

/// Identity forwarded by the upstream gateway.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub actor: Actor,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let user_id = header(headers, USER_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(AppError::Unauthorized)?;

    let role = match header(headers, USER_ROLE_HEADER) {
        Some(raw) => Role::parse(raw).ok_or(AppError::Unauthorized)?,
        None => Role::User,
    };

    let workshop_id = match header(headers, WORKSHOP_ID_HEADER) {
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| AppError::BadRequest("Invalid workshop id header".to_string()))?,
        ),
        None => None,
    };

    if role == Role::WorkshopAdmin && workshop_id.is_none() {
        return Err(AppError::Forbidden);
    }

    Ok(Actor {
        user_id,
        role,
        workshop_id,
    })
}

pub async fn require_auth(mut request: Request, next: Next) -> Result<Response, AppError> {
    let actor = actor_from_headers(request.headers())?;

    request.extensions_mut().insert(CurrentUser { actor });

    Ok(next.run(request).await)
}
