//! `/ws`: the agent notification socket.
//!
//! The connection is authenticated before the upgrade and bound to the agent's
//! company for its whole life. One task per socket multiplexes the hub queue,
//! inbound client frames and heartbeat probes, so frames leave in the order
//! they were published.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::models::{AgentIdentity, ClientMessage, ServerEvent};
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use crate::{
    app_state::AppState,
    auth::request_token,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
    middleware::auth::resolve_identity,
    services::notification_hub::{NotificationHub, Outbound, Subscription},
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WsQuery {
    /// Session token for clients that cannot set headers.
    token: Option<String>,
}

/// Upgrades an authenticated agent to a notification socket. Connections
/// without a resolvable session are refused with 401 before the handshake.
#[utoipa::path(
    get,
    path = "/ws",
    params(WsQuery),
    responses(
        (status = 101, description = "Switching to the notification socket; frames follow the ServerEvent schema"),
        (status = 401, description = "Missing or invalid session", body = ProblemDetails)
    ),
    tag = "Realtime"
)]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let token = request_token(
        &headers,
        query.token.as_deref(),
        &state.config.session.cookie_name,
    )
    .ok_or_else(|| ApiError::unauthorized("missing session token"))?;
    let identity = resolve_identity(&state, &token).await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = Arc::clone(&state.hub);
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, hub, identity)))
}

async fn serve_socket(socket: WebSocket, hub: Arc<NotificationHub>, identity: AgentIdentity) {
    let Subscription {
        id,
        company_id,
        liveness,
        mut receiver,
    } = hub.accept(identity.company_id).await;
    let (mut sink, mut stream) = socket.split();
    info!(connection = %id, company_id, user_id = identity.user_id, "websocket session started");

    let reason = loop {
        tokio::select! {
            outbound = receiver.recv() => {
                let frame = match outbound {
                    Some(Outbound::Event(payload)) => Message::Text(payload.as_ref().into()),
                    Some(Outbound::Probe) => Message::Ping(Bytes::new()),
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break "closed by server";
                    }
                };
                if let Err(err) = sink.send(frame).await {
                    debug!(connection = %id, error = %err, "websocket send failed");
                    break "send failed";
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    liveness.mark_alive();
                    let Some(reply) = handle_client_frame(text.as_str()) else {
                        continue;
                    };
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            if sink.send(Message::Text(json.into())).await.is_err() {
                                break "send failed";
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to encode reply frame"),
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Ping(_) | Message::Binary(_))) => {
                    liveness.mark_alive();
                }
                Some(Ok(Message::Close(_))) | None => break "closed by peer",
                Some(Err(err)) => {
                    debug!(connection = %id, error = %err, "websocket receive failed");
                    break "transport error";
                }
            }
        }
    };

    hub.remove(id).await;
    info!(connection = %id, company_id, reason, "websocket session ended");
}

/// Interprets a client control frame and returns the reply to send, if any.
/// Malformed frames are logged and ignored; they never close the connection.
fn handle_client_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => Some(ServerEvent::pong()),
        Ok(
            ClientMessage::JoinConversation { conversation_id }
            | ClientMessage::LeaveConversation { conversation_id },
        ) => {
            debug!(?conversation_id, "conversation scoping frame ignored");
            None
        }
        Err(err) => {
            warn!(error = %err, "ignoring malformed client frame");
            None
        }
    }
}
