//! Duplex connection driver: one read task and one write task per client,
//! joined only by the bounded mailbox.
//!
//! Write path drains the mailbox and pings every 54 s with a 10 s write
//! deadline. Read path enforces a 60 s idle deadline that any inbound frame
//! (pong included) refreshes. Failure on either side closes the connection.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ChatSink, FabricDeps};
use crate::bus::EventBus;
use crate::cache::StateCache;
use crate::domain::{AuctionEvent, AuctionId, UserId};

const PING_INTERVAL: Duration = Duration::from_secs(54);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Drive one upgraded connection until either side fails or disconnects.
pub async fn serve_connection(
    socket: WebSocket,
    deps: FabricDeps,
    auction_id: AuctionId,
    user_id: Option<UserId>,
) {
    let (client_id, mailbox, feedback) = deps.hub.join(auction_id);

    let viewers = deps.cache.incr_viewers(auction_id).await;
    deps.hub
        .send_to_room(auction_id, &AuctionEvent::viewer_count(auction_id, viewers));

    let (sink, stream) = socket.split();
    let write_task = tokio::spawn(write_pump(sink, mailbox));

    read_pump(stream, &deps, auction_id, user_id, feedback).await;

    // Reader is done; tear down the writer and the room membership.
    write_task.abort();
    deps.hub.leave(auction_id, client_id);
    let viewers = deps.cache.decr_viewers(auction_id).await;
    deps.hub
        .send_to_room(auction_id, &AuctionEvent::viewer_count(auction_id, viewers));
    debug!(auction_id = %auction_id, client_id, "connection closed");
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: tokio::sync::mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so pings start one
    // interval from now.
    ping.tick().await;

    loop {
        tokio::select! {
            maybe = mailbox.recv() => {
                // A closed mailbox means the hub dropped this client.
                let Some(payload) = maybe else { break };
                match timeout(WRITE_DEADLINE, sink.send(Message::Text(payload.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            _ = ping.tick() => {
                match timeout(WRITE_DEADLINE, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    deps: &FabricDeps,
    auction_id: AuctionId,
    user_id: Option<UserId>,
    feedback: tokio::sync::mpsc::Sender<String>,
) {
    loop {
        let frame = match timeout(READ_DEADLINE, stream.next()).await {
            // Idle past the read deadline with no frame, pong included.
            Err(_) => break,
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                handle_inbound(deps, auction_id, user_id, text.as_str(), &feedback).await;
            }
            Message::Close(_) => break,
            // Pong, ping (answered by the protocol layer), and binary frames
            // only refresh the read deadline.
            _ => {}
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

async fn handle_inbound(
    deps: &FabricDeps,
    auction_id: AuctionId,
    user_id: Option<UserId>,
    text: &str,
    feedback: &tokio::sync::mpsc::Sender<String>,
) {
    // Malformed and unknown messages are ignored, not fatal.
    let Ok(message) = serde_json::from_str::<InboundMessage>(text) else {
        return;
    };

    match message.kind.as_str() {
        "ping" => {
            let _ = feedback.try_send(r#"{"type":"pong"}"#.to_string());
        }
        "chat" => {
            if !deps.chat_enabled {
                return;
            }
            // Anonymous viewers can watch but not chat.
            let Some(user_id) = user_id else { return };
            let Some(body) = message.data.get("message").and_then(Value::as_str) else {
                return;
            };
            let body = body.trim();
            if body.is_empty() {
                return;
            }

            deps.chat.persist(auction_id, user_id, body).await;
            if let Err(err) = deps
                .bus
                .publish(AuctionEvent::chat(auction_id, user_id, body.to_string()))
                .await
            {
                warn!(auction_id = %auction_id, error = %err, "failed to publish chat event");
            }
        }
        _ => {}
    }
}
