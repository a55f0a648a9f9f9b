use crate::error::GameError;
use crate::game_manager::{session::MoveReject, AppState, GameOutcome, Phase};
use shared::{ClientMessage, ServerMessage, Side};

impl AppState {
    /// Turn-order and bounds enforcement, then relay to the opponent. The
    /// server never judges legality; the clients agree on the rules.
    pub async fn handle_move(&self, player_id: &str, msg: ClientMessage) -> Result<(), GameError> {
        let ClientMessage::Move {
            from,
            to,
            promotion,
            white_time,
            black_time,
        } = msg
        else {
            return Err(GameError::Malformed);
        };

        let Some(room_id) = self.active_room_of(player_id).await else {
            // Not playing; nothing to relay.
            return Ok(());
        };
        let Some(room_lock) = self.rooms.get(&room_id) else {
            return Ok(());
        };
        let mut session = room_lock.write().await;

        let opponent = match session.accept_move(player_id, from, to) {
            Ok(side) => {
                tracing::debug!(room_id = %room_id, side = %side, "move accepted");
                session.player_of(side.opposite()).map(str::to_string)
            }
            Err(MoveReject::NotYourTurn) => return Err(GameError::NotYourTurn),
            // Malformed coordinates and moves outside an active game are
            // dropped without a reply.
            Err(MoveReject::OutOfBounds) | Err(MoveReject::NotPlaying) => return Ok(()),
        };
        drop(session);
        drop(room_lock);

        if let Some(opponent) = opponent {
            self.send_to(
                &opponent,
                ServerMessage::Move {
                    from,
                    to,
                    promotion,
                    white_time,
                    black_time,
                },
            );
        }
        Ok(())
    }

    pub async fn handle_resign(&self, player_id: &str) {
        let Some(room_id) = self.active_room_of(player_id).await else {
            return;
        };
        let loser = {
            let Some(room_lock) = self.rooms.get(&room_id) else {
                return;
            };
            let session = room_lock.read().await;
            session.seat_of(player_id)
        };
        let Some(loser) = loser else { return };

        if self
            .finish_room(&room_id, GameOutcome::Win(loser.opposite()))
            .await
        {
            tracing::info!(room_id = %room_id, loser = %loser, "resignation");
            self.relay_to_opponent(&room_id, player_id, ServerMessage::OpponentResigned)
                .await;
        }
    }

    /// A timeout claim is taken at the claimant's word; the server keeps no
    /// authoritative clock. See the trust note in DESIGN.md.
    pub async fn handle_timeout(&self, player_id: &str, loser: Side) {
        let Some(room_id) = self.active_room_of(player_id).await else {
            return;
        };
        let winner = loser.opposite();
        if self.finish_room(&room_id, GameOutcome::Win(winner)).await {
            tracing::info!(room_id = %room_id, winner = %winner, "timeout claimed");
            self.relay_to_opponent(&room_id, player_id, ServerMessage::Timeout { winner })
                .await;
        }
    }

    /// Client-reported end of game (checkmate, stalemate, agreed draw). Both
    /// clients already know the result, so nothing is relayed.
    pub async fn handle_game_end(&self, player_id: &str, result: &str, winner: Option<Side>) {
        let Some(room_id) = self.active_room_of(player_id).await else {
            return;
        };
        let outcome = match result {
            "draw" => GameOutcome::Draw,
            "win" => match winner {
                Some(side) => GameOutcome::Win(side),
                None => return,
            },
            _ => return,
        };
        if self.finish_room(&room_id, outcome).await {
            tracing::info!(room_id = %room_id, outcome = %outcome, "client-reported game end");
        }
    }

    pub async fn handle_chat(&self, player_id: &str, message: &str) {
        let Some(room_id) = self.room_of(player_id) else {
            return;
        };
        let in_game = match self.rooms.get(&room_id) {
            Some(room_lock) => room_lock.read().await.phase != Phase::Waiting,
            None => false,
        };
        if !in_game {
            return;
        }
        let message = escape_markup(&truncate_chars(message, crate::game_manager::CHAT_MAX));
        self.relay_to_opponent(&room_id, player_id, ServerMessage::Chat { message })
            .await;
    }

    /// `sync_request`/`sync_state` carry the clients' own move history and
    /// clocks; the server forwards them untouched.
    pub async fn handle_sync(&self, player_id: &str, msg: ServerMessage) {
        let Some(room_id) = self.room_of(player_id) else {
            return;
        };
        self.relay_to_opponent(&room_id, player_id, msg).await;
    }

    fn room_of(&self, player_id: &str) -> Option<String> {
        Some(self.player_to_room.get(player_id)?.value().clone())
    }

    async fn relay_to_opponent(&self, room_id: &str, player_id: &str, msg: ServerMessage) {
        let opponent = {
            let Some(room_lock) = self.rooms.get(room_id) else {
                return;
            };
            let session = room_lock.read().await;
            session.opponent_of(player_id).map(str::to_string)
        };
        if let Some(opponent) = opponent {
            self.send_to(&opponent, msg);
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Minimal HTML escaping so a relayed chat line cannot inject markup into
/// the opponent's client.
pub fn escape_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
