//! Live event stream. A new subscriber first gets a connection status and a
//! replay of the most recent transactions, then every event as it is published.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::history::store::HistoryStore;
use crate::pipeline::StreamEvent;

use super::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Events sent to a subscriber before it joins the live stream.
pub fn greeting_events(history: &HistoryStore, replay_count: usize) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::ConnectionStatus {
        status: "connected".to_string(),
        time: Utc::now(),
    }];
    events.extend(
        history
            .recent(replay_count)
            .into_iter()
            .map(StreamEvent::NewTransaction),
    );
    events
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();

    // Subscribe before snapshotting history so nothing published in between is missed
    let event_rx = state.hub.subscribe();
    let greeting = greeting_events(&state.history, state.replay_count);

    tracing::info!(
        replayed = greeting.len() - 1,
        subscribers = state.hub.subscriber_count(),
        "Subscriber connected"
    );

    run_session(sender, receiver, greeting, event_rx).await;
    tracing::info!(
        subscribers = state.hub.subscriber_count(),
        "Subscriber disconnected"
    );
}

/// Drive one connection until either direction ends. The event receiver is
/// dropped on return, so the subscriber stops counting as active right away.
async fn run_session<Tx, Rx, E>(
    mut sender: Tx,
    mut receiver: Rx,
    greeting: Vec<StreamEvent>,
    mut event_rx: broadcast::Receiver<StreamEvent>,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let outbound = async {
        for event in greeting {
            if send_event(&mut sender, &event).await.is_err() {
                return;
            }
        }

        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Subscriber lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event channel closed");
                    return;
                }
            }
        }
    };

    let inbound = async {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::debug!("Subscriber closed connection");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    return;
                }
            }
        }
    };

    tokio::select! {
        _ = outbound => tracing::debug!("Outbound stream ended"),
        _ = inbound => tracing::debug!("Inbound stream ended"),
    }
}

async fn send_event<S>(sender: &mut S, event: &StreamEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| {
        tracing::debug!("Subscriber went away mid-send");
    })
}
