use crate::game_manager::{AppState, GameOutcome, Phase, GRACE_PERIOD};
use shared::{ServerMessage, Side};
use std::sync::Arc;
use std::time::Duration;

impl AppState {
    /// Runs when a connection closes for any reason. A Waiting room dies
    /// immediately; an Active one holds the seat open for the grace period;
    /// a Finished one is reaped once nobody is left in it.
    pub async fn handle_disconnect(self: Arc<Self>, player_id: &str) {
        tracing::info!(player_id = %player_id, "player disconnected");
        self.players.remove(player_id);
        self.remove_from_queues(player_id).await;

        let Some((_, room_id)) = self.player_to_room.remove(player_id) else {
            return;
        };
        let Some(room_lock) = self.rooms.get(&room_id) else {
            return;
        };

        let mut session = room_lock.write().await;
        match session.phase {
            Phase::Waiting => {
                let name = session.white.name().map(str::to_string);
                drop(session);
                drop(room_lock);
                self.rooms.remove(&room_id);
                self.release_identity(name.as_deref(), &room_id);
                tracing::info!(room_id = %room_id, "waiting room abandoned");
            }
            Phase::Active => {
                let Some(side) = session.detach(player_id) else {
                    return;
                };
                let generation = session.seat_generation(side);
                let opponent = session.player_of(side.opposite()).map(str::to_string);
                drop(session);
                drop(room_lock);

                tracing::info!(room_id = %room_id, side = %side, "seat vacated, grace period started");
                if let Some(opponent) = &opponent {
                    self.send_to(opponent, ServerMessage::OpponentDisconnected);
                }

                let state = Arc::clone(&self);
                let room_id = room_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(GRACE_PERIOD).await;
                    state.expire_seat(&room_id, side, generation).await;
                });
            }
            Phase::Finished => {
                session.detach(player_id);
                let empty = session.white.player_id().is_none()
                    && session.black.player_id().is_none();
                drop(session);
                drop(room_lock);
                if empty {
                    self.rooms.remove(&room_id);
                    tracing::debug!(room_id = %room_id, "finished room reaped");
                }
            }
        }
    }

    /// Grace timer body. Re-validates the world before acting: the seat may
    /// have been reclaimed (and possibly vacated again) since the timer was
    /// scheduled, in which case the generation no longer matches and this
    /// fire is a no-op.
    pub async fn expire_seat(&self, room_id: &str, side: Side, generation: u64) {
        let recorded = {
            let Some(room_lock) = self.rooms.get(room_id) else {
                return;
            };
            let mut session = room_lock.write().await;
            if session.seat_generation(side) != generation || !session.seat(side).is_vacated() {
                return;
            }
            session.finish(GameOutcome::Win(side.opposite()))
        };

        tracing::info!(room_id = %room_id, side = %side, "grace period expired");
        if recorded {
            self.record_outcome(room_id, GameOutcome::Win(side.opposite()))
                .await;
        }

        // Tear the room down. The survivor only hears about it if this
        // expiry is what ended the game; a terminal event during the grace
        // window already told both clients everything they need.
        let opponent = {
            let Some((_, room_lock)) = self.rooms.remove(room_id) else {
                return;
            };
            let session = room_lock.read().await;
            session.player_of(side.opposite()).map(str::to_string)
        };
        if let Some(opponent) = opponent {
            if recorded {
                self.send_to(&opponent, ServerMessage::OpponentDisconnectedFinal);
            }
            self.player_to_room
                .remove_if(&opponent, |_, v| v.as_str() == room_id);
        }
    }

    /// Marks the session Finished with `outcome` if no terminal event beat
    /// us to it, recording the result exactly once. Returns whether this
    /// call was the one that ended the game.
    pub async fn finish_room(&self, room_id: &str, outcome: GameOutcome) -> bool {
        let recorded = {
            let Some(room_lock) = self.rooms.get(room_id) else {
                return false;
            };
            let mut session = room_lock.write().await;
            session.finish(outcome)
        };
        if recorded {
            self.record_outcome(room_id, outcome).await;
        }
        recorded
    }

    /// The exactly-once side effects of a terminal event: the identity guard
    /// is released and the account counters are bumped for each named seat.
    async fn record_outcome(&self, room_id: &str, outcome: GameOutcome) {
        let (white, black) = {
            let Some(room_lock) = self.rooms.get(room_id) else {
                return;
            };
            let session = room_lock.read().await;
            (
                session.white.name().map(str::to_string),
                session.black.name().map(str::to_string),
            )
        };
        self.release_identity(white.as_deref(), room_id);
        self.release_identity(black.as_deref(), room_id);
        self.accounts
            .record(white.as_deref(), black.as_deref(), outcome);
        tracing::info!(room_id = %room_id, outcome = %outcome, "result recorded");
    }

    /// Background sweep for rooms nothing else will reclaim: finished games
    /// both players walked away from, and sessions idle for over an hour.
    pub fn spawn_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let mut stale = Vec::new();
                for entry in self.rooms.iter() {
                    let session = entry.value().read().await;
                    let abandoned = session.phase == Phase::Finished
                        && session.white.player_id().is_none()
                        && session.black.player_id().is_none();
                    let idle = session.last_activity.elapsed() > Duration::from_secs(3600);
                    if abandoned || idle {
                        stale.push(entry.key().clone());
                    }
                }
                for room_id in stale {
                    tracing::info!(room_id = %room_id, "sweeping stale room");
                    if let Some((_, room_lock)) = self.rooms.remove(&room_id) {
                        let session = room_lock.read().await;
                        self.release_identity(session.white.name(), &room_id);
                        self.release_identity(session.black.name(), &room_id);
                        for seat in [&session.white, &session.black] {
                            if let Some(pid) = seat.player_id() {
                                self.player_to_room.remove_if(pid, |_, v| *v == room_id);
                            }
                        }
                    }
                }
            }
        });
    }
}
