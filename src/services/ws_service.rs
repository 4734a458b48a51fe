//! Runner WebSocket lifecycle: join handshake, telemetry loop, teardown.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{RunnerInboundMessage, RunnerOutboundMessage},
    services::{broadcast::send_message_to_websocket, race_service},
    state::{RunnerConnection, SharedState},
};

/// How long a fresh socket gets to present its join handshake.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one runner WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps ranked updates flowing even while we await
    // inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(JOIN_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket join handshake timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let inbound = match RunnerInboundMessage::from_json_str(&initial_message) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to parse or validate runner message");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let RunnerInboundMessage::Join {
        participant_id,
        session_id,
        ticket_id,
    } = inbound
    else {
        warn!("first message was not a join handshake");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let joined = match race_service::join_session(&state, participant_id, session_id, ticket_id)
        .await
    {
        Ok(joined) => joined,
        Err(err) => {
            warn!(participant_id = %participant_id, error = %err, "join handshake rejected");
            reject(&outbound_tx, &err.to_string());
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    state.runners().insert(
        participant_id,
        RunnerConnection {
            participant_id,
            session_id,
            tx: outbound_tx.clone(),
        },
    );
    send_message_to_websocket(&outbound_tx, &RunnerOutboundMessage::Joined(joined));
    info!(participant_id = %participant_id, session_id = %session_id, "runner socket ready");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match RunnerInboundMessage::from_json_str(&text) {
                Ok(message) => {
                    handle_frame(&state, participant_id, message, &outbound_tx).await;
                }
                Err(err) => {
                    warn!(participant_id = %participant_id, error = %err, "bad runner frame");
                    reject(&outbound_tx, &err.to_string());
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(participant_id = %participant_id, "runner closed the socket");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(participant_id = %participant_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.runners().remove(&participant_id);
    race_service::handle_disconnect(&state, participant_id).await;
    info!(participant_id = %participant_id, "runner disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Dispatch one in-session frame.
async fn handle_frame(
    state: &SharedState,
    participant_id: Uuid,
    message: RunnerInboundMessage,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let result = match message {
        RunnerInboundMessage::Telemetry(frame) => {
            race_service::handle_report(state, participant_id, &frame).await
        }
        RunnerInboundMessage::Finish(frame) => {
            race_service::handle_finish(state, participant_id, &frame).await
        }
        RunnerInboundMessage::GiveUp => race_service::give_up(state, participant_id).await,
        RunnerInboundMessage::Join { .. } => {
            warn!(participant_id = %participant_id, "ignoring duplicate join handshake");
            Ok(())
        }
        RunnerInboundMessage::Unknown => {
            warn!(participant_id = %participant_id, "ignoring unknown frame type");
            Ok(())
        }
    };

    if let Err(err) = result {
        warn!(participant_id = %participant_id, error = %err, "frame handling failed");
        reject(outbound_tx, &err.to_string());
    }
}

fn reject(outbound_tx: &mpsc::UnboundedSender<Message>, message: &str) {
    send_message_to_websocket(
        outbound_tx,
        &RunnerOutboundMessage::Rejected {
            message: message.to_string(),
        },
    );
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
