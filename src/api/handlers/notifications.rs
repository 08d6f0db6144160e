use std::{collections::HashSet, convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    error::{AppError, Result},
    notifications::{PushMessage, PushTarget},
};

/// Server-sent event stream of the caller's notifications.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let channel = state
        .service_context
        .push_channel
        .clone()
        .ok_or_else(|| AppError::NotFound("Notifications are disabled".to_string()))?;

    let audience: HashSet<String> = PushTarget::audience(&user.actor)
        .into_iter()
        .map(|t| t.to_string())
        .collect();

    tracing::debug!("User {} subscribed to notifications", user.actor.user_id);

    let receiver = channel.subscribe();
    let events = stream::unfold((receiver, audience), |(mut receiver, audience)| async move {
        loop {
            match receiver.recv().await {
                Ok(message) if audience.contains(&message.target) => {
                    let event = to_event(&message);
                    return Some((Ok::<_, Infallible>(event), (receiver, audience)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification stream lagged, {} messages dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_event(message: &PushMessage) -> Event {
    let kind = match serde_json::to_value(message.kind) {
        Ok(serde_json::Value::String(kind)) => kind,
        _ => "notification".to_string(),
    };
    match Event::default().event(kind.clone()).json_data(message) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Could not encode notification: {}", e);
            Event::default().event(kind).data(message.message.clone())
        }
    }
}

