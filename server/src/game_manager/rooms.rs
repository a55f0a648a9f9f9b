use crate::error::GameError;
use crate::game_manager::{AppState, GameSession, Phase, Seat};
use shared::{ServerMessage, Side};
use tokio::sync::RwLock;

impl AppState {
    pub async fn create_room(&self, player_id: &str, time: u32) -> Result<(), GameError> {
        if !crate::game_manager::TIME_CONTROLS.contains(&time) {
            return Err(GameError::BadTimeControl);
        }
        self.ensure_not_in_session(player_id).await?;

        let room_id = self.generate_room_id();
        let name = self.username_of(player_id);
        // The claim is the atomic gate; the check above is only a fast path.
        self.claim_identity(name.as_deref(), &room_id)?;
        // Hosting a room withdraws any pending matchmaking entry.
        self.remove_from_queues(player_id).await;
        let session =
            GameSession::create_waiting(room_id.clone(), player_id.to_string(), name.clone(), time);

        self.rooms.insert(room_id.clone(), RwLock::new(session));
        self.player_to_room
            .insert(player_id.to_string(), room_id.clone());

        tracing::info!(player_id = %player_id, room_id = %room_id, time, "room created");
        self.send_to(
            player_id,
            ServerMessage::RoomCreated {
                room_id: room_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn join_room(&self, player_id: &str, room_id: &str) -> Result<(), GameError> {
        let room_id = room_id.trim().to_uppercase();
        self.ensure_not_in_session(player_id).await?;

        let name = self.username_of(player_id);
        let starts = {
            let room_lock = self
                .rooms
                .get(&room_id)
                .ok_or_else(|| GameError::RoomNotFound(room_id.clone()))?;
            let mut session = room_lock.write().await;

            if session.phase != Phase::Waiting || session.is_full() {
                return Err(GameError::RoomFull);
            }
            // Host seat is white while Waiting.
            if session.white.player_id() == Some(player_id) {
                return Err(GameError::SelfPairing);
            }
            if let (Some(host), Some(guest)) = (session.white.name(), name.as_deref()) {
                if host.eq_ignore_ascii_case(guest) {
                    return Err(GameError::SelfPairing);
                }
            }
            self.claim_identity(name.as_deref(), &room_id)?;

            session.start(player_id.to_string(), name.clone());
            seat_payloads(&session, false)
        };

        self.remove_from_queues(player_id).await;
        self.player_to_room
            .insert(player_id.to_string(), room_id.clone());

        tracing::info!(player_id = %player_id, room_id = %room_id, "room joined, game starting");
        for (recipient, msg) in starts {
            self.send_to(&recipient, msg);
        }
        Ok(())
    }

    /// Reclaims a vacated seat for a new connection. Failures answer with
    /// `reconnect_failed` rather than a generic error so the client can fall
    /// back to the lobby.
    pub async fn reconnect(&self, player_id: &str, room_id: &str, color: Side) {
        let room_id = room_id.trim().to_uppercase();
        if self.active_room_of(player_id).await.is_some() {
            self.reconnect_failed(player_id, "already in a game");
            return;
        }

        let Some(room_lock) = self.rooms.get(&room_id) else {
            self.reconnect_failed(player_id, "room not found");
            return;
        };
        let mut session = room_lock.write().await;

        if let Err(reason) = session.reattach(color, player_id.to_string()) {
            drop(session);
            drop(room_lock);
            self.reconnect_failed(player_id, reason);
            return;
        }

        let opponent = session.player_of(color.opposite()).map(str::to_string);
        let opponent_name = session.seat(color.opposite()).name().map(str::to_string);
        let time = session.time_control;
        drop(session);
        drop(room_lock);

        self.remove_from_queues(player_id).await;
        self.player_to_room
            .insert(player_id.to_string(), room_id.clone());

        tracing::info!(player_id = %player_id, room_id = %room_id, color = %color, "seat reclaimed");
        self.send_to(
            player_id,
            ServerMessage::Reconnected {
                color,
                room_id,
                time,
                opponent_name,
            },
        );
        if let Some(opponent) = opponent {
            self.send_to(&opponent, ServerMessage::OpponentReconnected);
        }
    }

    fn reconnect_failed(&self, player_id: &str, reason: &str) {
        tracing::debug!(player_id = %player_id, reason = %reason, "reconnect refused");
        self.send_to(
            player_id,
            ServerMessage::ReconnectFailed {
                reason: reason.to_string(),
            },
        );
    }
}

/// One `game_start` per seat, each telling that side its own color and its
/// opponent's display name.
pub(crate) fn seat_payloads(
    session: &GameSession,
    matchmade: bool,
) -> Vec<(String, ServerMessage)> {
    let mut out = Vec::with_capacity(2);
    for side in [Side::White, Side::Black] {
        if let Seat::Occupied { player_id, .. } = session.seat(side) {
            out.push((
                player_id.clone(),
                ServerMessage::GameStart {
                    color: side,
                    room_id: session.id.clone(),
                    time: session.time_control,
                    opponent_name: session.seat(side.opposite()).name().map(str::to_string),
                    matchmade,
                },
            ));
        }
    }
    out
}
