//! WebSocket connection gateway.
//!
//! A handshake moves Pending -> Resolving -> Admitted or Rejected: the
//! session token is pulled from the query string or the session cookie,
//! resolved against the session registry exactly once, and the upgrade
//! only happens for an authenticated session. An admitted connection
//! keeps the identity it was tagged with even if the underlying session
//! is invalidated later.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::GatewayState;
use crate::websocket::hub::{ChatHub, ClientEvent};

/// Cookie carrying the session token, set by the auth endpoints.
pub const SESSION_COOKIE: &str = "murmur_session";

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Chat WebSocket handler. Rejected handshakes never create a
/// connection object and never see any history.
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WebSocketQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query.token.or_else(|| session_cookie(&headers));

    let Some(identity) = resolve_handshake_identity(&state, token).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_chat_socket(socket, hub, identity))
}

/// Resolve the handshake token to an authenticated identity, or `None`
/// if the connection must be rejected.
pub async fn resolve_handshake_identity(
    state: &GatewayState,
    token: Option<String>,
) -> Option<String> {
    let Some(token) = token else {
        debug!("rejecting websocket handshake without a session token");
        return None;
    };

    match state.authenticator.resolve_identity(&token).await {
        Ok(Some(identity)) => Some(identity),
        Ok(None) => {
            debug!("rejecting websocket handshake: no authenticated identity on session");
            None
        }
        Err(error) => {
            warn!(%error, "rejecting websocket handshake: session resolution failed");
            None
        }
    }
}

async fn handle_chat_socket(socket: WebSocket, hub: Arc<ChatHub>, identity: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // One-way channel from the hub to this peer; the hub never talks to
    // the socket directly.
    let (sender, mut events) = mpsc::unbounded_channel();
    let connection_id = hub.connect(identity, sender).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let hub_for_receive = hub.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Submit { message, date }) => {
                        hub_for_receive.submit(connection_id, &message, &date).await;
                    }
                    Ok(ClientEvent::RequestHistory) => {
                        hub_for_receive.request_history(connection_id).await;
                    }
                    Err(_) => {
                        debug!(connection_id, "ignoring malformed client event");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }

    hub.disconnect(connection_id).await;
}

/// Pull the session token out of the `Cookie` header, shared with the
/// REST auth endpoints.
pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_cookie_is_extracted_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; murmur_session=tok123; lang=en"),
        );

        assert_eq!(session_cookie(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn missing_session_cookie_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));

        assert!(session_cookie(&headers).is_none());
        assert!(session_cookie(&HeaderMap::new()).is_none());
    }
}
