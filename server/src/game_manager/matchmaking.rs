use crate::error::GameError;
use crate::game_manager::{rooms::seat_payloads, AppState, GameSession};
use shared::ServerMessage;
use tokio::sync::RwLock;

pub struct QueueEntry {
    pub player_id: String,
    pub username: String,
}

impl AppState {
    /// Pair-or-enqueue. Everything from the stale purge to the table inserts
    /// happens under the queue lock with no await in between, so two
    /// concurrent joins can never both claim the same waiting entry.
    pub async fn matchmaking_join(&self, player_id: &str, time: u32) -> Result<(), GameError> {
        if !crate::game_manager::TIME_CONTROLS.contains(&time) {
            return Err(GameError::BadTimeControl);
        }
        let username = self
            .username_of(player_id)
            .ok_or(GameError::UsernameRequired)?;
        self.ensure_not_in_session(player_id).await?;

        let mut queues = self.queues.lock().await;
        let bucket = queues.entry(time).or_default();

        // Entries whose connection is gone, or whose identity has since
        // entered a room, are dead weight; drop them now.
        bucket.retain(|e| {
            self.players.contains_key(&e.player_id)
                && !self.identity_to_room.contains_key(&e.username.to_lowercase())
        });

        if bucket.iter().any(|e| e.player_id == player_id) {
            let queue_size = bucket.len();
            drop(queues);
            self.send_to(player_id, ServerMessage::MatchmakingWaiting { queue_size });
            return Ok(());
        }

        // First waiting entry with a different identity; a player queued on
        // two connections must never be paired with themselves. Claims are
        // atomic, so an entry whose identity slipped into a room between the
        // purge and here is dropped instead of double-booked.
        let room_id = self.generate_room_id();
        let mut opponent = None;
        while let Some(pos) = bucket
            .iter()
            .position(|e| !e.username.eq_ignore_ascii_case(&username))
        {
            let Some(entry) = bucket.remove(pos) else { break };
            if self.claim_identity(Some(&entry.username), &room_id).is_ok() {
                opponent = Some(entry);
                break;
            }
        }

        match opponent {
            Some(entry) => {
                if let Err(err) = self.claim_identity(Some(&username), &room_id) {
                    // The caller's identity won a race elsewhere; give the
                    // waiting entry its place back.
                    self.release_identity(Some(&entry.username), &room_id);
                    bucket.push_front(entry);
                    return Err(err);
                }
                tracing::info!(
                    room_id = %room_id,
                    host = %entry.username,
                    guest = %username,
                    time,
                    "matchmaking paired"
                );
                let mut session = GameSession::create_waiting(
                    room_id.clone(),
                    entry.player_id.clone(),
                    Some(entry.username.clone()),
                    time,
                );
                session.start(player_id.to_string(), Some(username.clone()));
                let starts = seat_payloads(&session, true);

                self.rooms.insert(room_id.clone(), RwLock::new(session));
                self.player_to_room
                    .insert(entry.player_id.clone(), room_id.clone());
                self.player_to_room
                    .insert(player_id.to_string(), room_id.clone());
                drop(queues);

                for (recipient, msg) in starts {
                    self.send_to(&recipient, msg);
                }
            }
            None => {
                bucket.push_back(QueueEntry {
                    player_id: player_id.to_string(),
                    username: username.clone(),
                });
                let queue_size = bucket.len();
                drop(queues);
                tracing::info!(player_id = %player_id, username = %username, time, queue_size, "queued for matchmaking");
                self.send_to(player_id, ServerMessage::MatchmakingWaiting { queue_size });
            }
        }
        Ok(())
    }

    pub async fn matchmaking_cancel(&self, player_id: &str) {
        self.remove_from_queues(player_id).await;
        self.send_to(player_id, ServerMessage::MatchmakingCancelled);
    }

    pub async fn remove_from_queues(&self, player_id: &str) {
        let mut queues = self.queues.lock().await;
        for bucket in queues.values_mut() {
            bucket.retain(|e| e.player_id != player_id);
        }
    }
}
