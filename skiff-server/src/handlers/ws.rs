//! Realtime change feed over a websocket.
//!
//! Clients authenticate with `?token=<jwt>` on upgrade and then send
//! `{"type":"subscribe","paths":[...]}`. Each delivered frame is one
//! change event. Permissions are re-checked by the hub per delivery, so a
//! revoked membership stops the feed within one event.

use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use skiff_model::User;

use crate::infra::app_state::AppState;
use crate::infra::errors::AppError;
use crate::users::auth::middleware::validate_and_get_user;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe {
        #[serde(default)]
        paths: Vec<String>,
    },
}

pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let user = validate_and_get_user(&state, &query.token)
        .await
        .ok_or_else(|| AppError::unauthorized("invalid token"))?;
    Ok(upgrade.on_upgrade(move |socket| handle_socket(state, user, socket)))
}

async fn handle_socket(state: AppState, user: User, socket: WebSocket) {
    let (mut tx, mut rx) = socket.split();

    // The feed starts with an explicit subscribe so clients can scope it.
    let mut subscription = loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { paths }) => {
                        break state.hub.subscribe(user.clone(), paths);
                    }
                    Err(e) => {
                        debug!("ignoring unparsable ws message: {e}");
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("ws receive error before subscribe: {e}");
                return;
            }
        }
    };

    let ack = json!({ "type": "subscribed" }).to_string();
    if tx.send(Message::Text(ack.into())).await.is_err() {
        state.hub.cancel(subscription.id);
        return;
    }

    loop {
        tokio::select! {
            event = subscription.rx.recv() => match event {
                Ok(change) => {
                    let frame = match serde_json::to_string(&json!({
                        "type": "change",
                        "event": change,
                    })) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("failed to encode change event: {e}");
                            continue;
                        }
                    };
                    if tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    subscription.drops.fetch_add(n, Ordering::Relaxed);
                    debug!("subscriber {} lagged, dropped {n} events", subscription.id);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    // A fresh subscribe replaces the filter set.
                    if let Ok(ClientMessage::Subscribe { paths }) =
                        serde_json::from_str::<ClientMessage>(&text)
                    {
                        state.hub.cancel(subscription.id);
                        subscription = state.hub.subscribe(user.clone(), paths);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("ws receive error: {e}");
                    break;
                }
            },
        }
    }

    state.hub.cancel(subscription.id);
}
