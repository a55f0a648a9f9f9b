use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// A board square as the clients address it. The server checks bounds before
/// relaying and never interprets the move beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coord {
    pub row: i32,
    pub col: i32,
}

pub const BOARD_SIZE: i32 = 8;

impl Coord {
    pub fn in_bounds(&self) -> bool {
        (0..BOARD_SIZE).contains(&self.row) && (0..BOARD_SIZE).contains(&self.col)
    }
}

fn default_time() -> u32 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SetUsername {
        username: String,
    },
    CreateRoom {
        #[serde(default = "default_time")]
        time: u32,
    },
    JoinRoom {
        room_id: String,
    },
    MatchmakingJoin {
        #[serde(default = "default_time")]
        time: u32,
    },
    MatchmakingCancel,
    Move {
        from: Coord,
        to: Coord,
        #[serde(default)]
        promotion: Option<String>,
        #[serde(default)]
        white_time: Option<u64>,
        #[serde(default)]
        black_time: Option<u64>,
    },
    Timeout {
        loser: Side,
    },
    Resign,
    GameEnd {
        result: String,
        #[serde(default)]
        winner: Option<Side>,
    },
    Chat {
        message: String,
    },
    Reconnect {
        room_id: String,
        color: Side,
    },
    SyncRequest,
    SyncState {
        #[serde(default)]
        moves: serde_json::Value,
        #[serde(default)]
        clocks: serde_json::Value,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
    },
    GameStart {
        color: Side,
        room_id: String,
        time: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        opponent_name: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        matchmade: bool,
    },
    MatchmakingWaiting {
        queue_size: usize,
    },
    MatchmakingCancelled,
    Move {
        from: Coord,
        to: Coord,
        #[serde(skip_serializing_if = "Option::is_none")]
        promotion: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        white_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        black_time: Option<u64>,
    },
    Timeout {
        winner: Side,
    },
    OpponentResigned,
    Chat {
        message: String,
    },
    Reconnected {
        color: Side,
        room_id: String,
        time: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        opponent_name: Option<String>,
    },
    ReconnectFailed {
        reason: String,
    },
    SyncRequest,
    SyncState {
        moves: serde_json::Value,
        clocks: serde_json::Value,
    },
    Pong,
    OpponentDisconnected,
    OpponentDisconnectedFinal,
    OpponentReconnected,
    Error {
        message: String,
    },
}
