use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, warn};
use uuid::Uuid;

use ember_db::Database;
use ember_types::api::Claims;
use ember_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds. A connection
/// that misses a Pong for a whole interval is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, then relay
/// targeted events and presence until the client goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: the first frame must be an Identify command with a valid JWT.
    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{user_id} connected to gateway");

    // Step 2: confirm with Ready.
    let ready = GatewayEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // The live connection is the freshest presence signal we have.
    touch_last_seen(&db, user_id).await;

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    // Tell this client who is already online, then announce ourselves.
    for online_id in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: online_id,
            online: true,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            dispatcher.user_offline(user_id, conn_id).await;
            return;
        }
    }
    dispatcher.user_online(user_id).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // Targeted events for this user (messages, matches, typing).
            event = user_rx.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Presence fan-out.
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("{user_id} lagged {skipped} presence events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    warn!("{user_id} missed heartbeat, dropping connection");
                    break;
                }
                awaiting_pong = true;
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Text(text))) => {
                        handle_command(text.as_str(), user_id, &dispatcher, &db).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("{user_id} websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    dispatcher.user_offline(user_id, conn_id).await;
    touch_last_seen(&db, user_id).await;
    info!("{user_id} disconnected from gateway");
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    while let Some(Ok(frame)) = receiver.next().await {
        let Message::Text(text) = frame else { continue };
        let Ok(GatewayCommand::Identify { token }) = serde_json::from_str(text.as_str()) else {
            return None;
        };
        let claims = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;
        return Some(claims.claims.sub);
    }
    None
}

async fn handle_command(text: &str, user_id: Uuid, dispatcher: &Dispatcher, db: &Arc<Database>) {
    let command = match serde_json::from_str::<GatewayCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("{user_id} sent an unparseable command: {e}");
            return;
        }
    };

    match command {
        GatewayCommand::Identify { .. } => {
            // Already identified; ignore.
        }
        GatewayCommand::StartTyping { peer_id } => {
            // Typing is gated the same way messages are: no match, no relay.
            let db = db.clone();
            let matched = tokio::task::spawn_blocking(move || db.is_mutual_match(user_id, peer_id))
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or(false);
            if matched {
                dispatcher
                    .send_to_user(peer_id, GatewayEvent::TypingStart { user_id })
                    .await;
            }
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    sender
        .send(Message::Text(serde_json::to_string(event).unwrap().into()))
        .await
}

async fn touch_last_seen(db: &Arc<Database>, user_id: Uuid) {
    let db = db.clone();
    if let Ok(Err(e)) = tokio::task::spawn_blocking(move || db.touch_last_seen(user_id)).await {
        warn!("failed to touch last_seen for {user_id}: {e}");
    }
}
