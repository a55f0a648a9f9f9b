use crate::accounts::AccountStore;
use crate::engine::EngineService;
use crate::error::GameError;
use dashmap::DashMap;
use shared::ServerMessage;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

pub mod lifecycle;
pub mod matchmaking;
pub mod move_handler;
pub mod rooms;
pub mod session;
#[cfg(test)]
pub mod tests;

pub use session::{GameOutcome, GameSession, Phase, Seat};

pub type Tx = tokio::sync::mpsc::UnboundedSender<ServerMessage>;

/// Sliding-window rate limit per connection.
pub const RATE_WINDOW: Duration = Duration::from_secs(10);
pub const RATE_CAP: usize = 30;

/// How long a vacated seat is held for reconnection.
pub const GRACE_PERIOD: Duration = Duration::from_secs(120);

/// Per-side countdown budgets in seconds; 0 means untimed.
pub const TIME_CONTROLS: [u32; 5] = [0, 60, 180, 300, 600];

pub const USERNAME_MAX: usize = 20;
pub const USERNAME_MIN: usize = 2;
pub const CHAT_MAX: usize = 200;

const ROOM_ID_LEN: usize = 5;
const ROOM_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub struct Player {
    pub tx: Tx,
    pub username: Option<String>,
    /// Timestamps of recent inbound messages, pruned lazily.
    pub recent: VecDeque<Instant>,
}

pub struct AppState {
    pub players: DashMap<String, Player>,
    pub rooms: DashMap<String, RwLock<GameSession>>,
    pub player_to_room: DashMap<String, String>,
    /// lowercased identity -> room id; the one-active-session guard.
    pub identity_to_room: DashMap<String, String>,
    /// time control -> FIFO of waiting players. One lock over all buckets
    /// keeps the pair-or-enqueue step a single critical section.
    pub queues: Mutex<HashMap<u32, VecDeque<matchmaking::QueueEntry>>>,
    pub accounts: AccountStore,
    pub engine: EngineService,
}

impl AppState {
    pub fn new(accounts: AccountStore, engine: EngineService) -> Self {
        Self {
            players: DashMap::new(),
            rooms: DashMap::new(),
            player_to_room: DashMap::new(),
            identity_to_room: DashMap::new(),
            queues: Mutex::new(HashMap::new()),
            accounts,
            engine,
        }
    }

    pub fn add_player(&self, id: String, tx: Tx) {
        tracing::info!(player_id = %id, "player connected");
        self.players.insert(
            id,
            Player {
                tx,
                username: None,
                recent: VecDeque::new(),
            },
        );
    }

    pub fn send_to(&self, player_id: &str, msg: ServerMessage) {
        if let Some(player) = self.players.get(player_id) {
            let _ = player.tx.send(msg);
        }
    }

    pub fn username_of(&self, player_id: &str) -> Option<String> {
        self.players.get(player_id)?.username.clone()
    }

    /// Binds a display identity to the connection. Set once; the raw value
    /// is truncated to 20 chars before validation.
    pub fn set_username(&self, player_id: &str, raw: &str) -> Result<String, GameError> {
        let name: String = raw.trim().chars().take(USERNAME_MAX).collect();
        if name.chars().count() < USERNAME_MIN
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GameError::UsernameInvalid);
        }
        let mut player = self
            .players
            .get_mut(player_id)
            .ok_or(GameError::Malformed)?;
        if player.username.is_some() {
            return Err(GameError::UsernameAlreadySet);
        }
        tracing::info!(player_id = %player_id, username = %name, "username set");
        player.username = Some(name.clone());
        Ok(name)
    }

    /// Admits or rejects an inbound message against the sliding window.
    pub fn check_rate_limit(&self, player_id: &str) -> bool {
        let Some(mut player) = self.players.get_mut(player_id) else {
            return false;
        };
        let now = Instant::now();
        while let Some(front) = player.recent.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                player.recent.pop_front();
            } else {
                break;
            }
        }
        if player.recent.len() >= RATE_CAP {
            return false;
        }
        player.recent.push_back(now);
        true
    }

    /// `AlreadyInSession` if the caller's identity or connection is already
    /// tied to a live room. Finished and vanished rooms do not count.
    pub async fn ensure_not_in_session(&self, player_id: &str) -> Result<(), GameError> {
        if let Some(room_id) = self.active_room_of(player_id).await {
            tracing::debug!(player_id = %player_id, room_id = %room_id, "still in a live room");
            return Err(GameError::AlreadyInSession);
        }
        if let Some(name) = self.username_of(player_id) {
            if self.identity_to_room.contains_key(&name.to_lowercase()) {
                return Err(GameError::AlreadyInSession);
            }
        }
        Ok(())
    }

    /// The room this connection is bound to, if that room is still live
    /// (Waiting or Active). A Finished room keeps its back-references until
    /// the disconnect path or the periodic sweep reaps it, so it never
    /// blocks the player from starting a new game.
    pub async fn active_room_of(&self, player_id: &str) -> Option<String> {
        let room_id = self.player_to_room.get(player_id)?.value().clone();
        let live = match self.rooms.get(&room_id) {
            Some(room_lock) => room_lock.read().await.phase != Phase::Finished,
            None => false,
        };
        live.then_some(room_id)
    }

    /// Atomically claims the identity for `room_id` through the entry API,
    /// so two concurrent creates/joins for the same identity cannot both
    /// pass a check and both bind. Re-claiming the room the identity already
    /// holds is fine; anonymous connections claim nothing.
    pub fn claim_identity(&self, name: Option<&str>, room_id: &str) -> Result<(), GameError> {
        let Some(name) = name else { return Ok(()) };
        match self.identity_to_room.entry(name.to_lowercase()) {
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                if slot.get().as_str() == room_id {
                    Ok(())
                } else {
                    Err(GameError::AlreadyInSession)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(room_id.to_string());
                Ok(())
            }
        }
    }

    /// Clears an identity's session claim, but only if it still points at
    /// `room_id` (the identity may have moved on to a newer session).
    pub fn release_identity(&self, name: Option<&str>, room_id: &str) {
        if let Some(name) = name {
            self.identity_to_room
                .remove_if(&name.to_lowercase(), |_, v| v.as_str() == room_id);
        }
    }

    pub fn generate_room_id(&self) -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (0..ROOM_ID_LEN)
                .map(|_| ROOM_ID_CHARS[rng.gen_range(0..ROOM_ID_CHARS.len())] as char)
                .collect();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}
