use crate::error::GameError;
use crate::game_manager::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use shared::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Writer task: everything the server wants this client to see goes
    // through the channel and out over the socket in order.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Opaque connection id; identity is claimed separately via set_username.
    let player_id = uuid::Uuid::new_v4().to_string();
    state.add_player(player_id.clone(), tx);

    // Messages from one connection are handled strictly in arrival order.
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let msg = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(player_id = %player_id, error = %err, "undecodable message");
                state.send_to(
                    &player_id,
                    ServerMessage::Error {
                        message: GameError::Malformed.to_string(),
                    },
                );
                continue;
            }
        };

        if !state.check_rate_limit(&player_id) {
            tracing::warn!(player_id = %player_id, "rate limit exceeded");
            state.send_to(
                &player_id,
                ServerMessage::Error {
                    message: GameError::RateExceeded.to_string(),
                },
            );
            continue;
        }

        if let Err(err) = dispatch(&state, &player_id, msg).await {
            state.send_to(
                &player_id,
                ServerMessage::Error {
                    message: err.to_string(),
                },
            );
        }
    }

    Arc::clone(&state).handle_disconnect(&player_id).await;
}

async fn dispatch(
    state: &Arc<AppState>,
    player_id: &str,
    msg: ClientMessage,
) -> Result<(), GameError> {
    match msg {
        ClientMessage::SetUsername { username } => {
            state.set_username(player_id, &username)?;
        }
        ClientMessage::CreateRoom { time } => {
            state.create_room(player_id, time).await?;
        }
        ClientMessage::JoinRoom { room_id } => {
            state.join_room(player_id, &room_id).await?;
        }
        ClientMessage::MatchmakingJoin { time } => {
            state.matchmaking_join(player_id, time).await?;
        }
        ClientMessage::MatchmakingCancel => {
            state.matchmaking_cancel(player_id).await;
        }
        msg @ ClientMessage::Move { .. } => {
            state.handle_move(player_id, msg).await?;
        }
        ClientMessage::Timeout { loser } => {
            state.handle_timeout(player_id, loser).await;
        }
        ClientMessage::Resign => {
            state.handle_resign(player_id).await;
        }
        ClientMessage::GameEnd { result, winner } => {
            state.handle_game_end(player_id, &result, winner).await;
        }
        ClientMessage::Chat { message } => {
            state.handle_chat(player_id, &message).await;
        }
        ClientMessage::Reconnect { room_id, color } => {
            state.reconnect(player_id, &room_id, color).await;
        }
        ClientMessage::SyncRequest => {
            state.handle_sync(player_id, ServerMessage::SyncRequest).await;
        }
        ClientMessage::SyncState { moves, clocks } => {
            state
                .handle_sync(player_id, ServerMessage::SyncState { moves, clocks })
                .await;
        }
        ClientMessage::Ping => {
            state.send_to(player_id, ServerMessage::Pong);
        }
    }
    Ok(())
}
