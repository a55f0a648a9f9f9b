use shared::{Coord, Side};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Active,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seat {
    Empty,
    Occupied {
        player_id: String,
        name: Option<String>,
    },
    Vacated {
        name: Option<String>,
    },
}

impl Seat {
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Seat::Occupied { player_id, .. } => Some(player_id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Seat::Occupied { name, .. } | Seat::Vacated { name } => name.as_deref(),
            Seat::Empty => None,
        }
    }

    pub fn is_vacated(&self) -> bool {
        matches!(self, Seat::Vacated { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Win(Side),
    Draw,
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::Win(side) => write!(f, "win:{}", side),
            GameOutcome::Draw => write!(f, "draw"),
        }
    }
}

/// Why an inbound move was not accepted. `NotYourTurn` is reported back to
/// the sender; everything else is dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveReject {
    NotYourTurn,
    OutOfBounds,
    NotPlaying,
}

pub struct GameSession {
    pub id: String,
    pub time_control: u32,
    pub phase: Phase,
    pub white: Seat,
    pub black: Seat,
    pub turn: Side,
    pub outcome: Option<GameOutcome>,
    /// Bumped when that seat detaches or reattaches, so a pending grace
    /// timer can tell its own seat has moved on when it fires. Per seat:
    /// the opponent detaching must not invalidate this seat's timer.
    white_generation: u64,
    black_generation: u64,
    pub last_activity: Instant,
}

impl GameSession {
    pub fn create_waiting(
        id: String,
        host_id: String,
        host_name: Option<String>,
        time_control: u32,
    ) -> Self {
        // The host holds the white seat provisionally; start() may swap.
        Self {
            id,
            time_control,
            phase: Phase::Waiting,
            white: Seat::Occupied {
                player_id: host_id,
                name: host_name,
            },
            black: Seat::Empty,
            turn: Side::White,
            outcome: None,
            white_generation: 0,
            black_generation: 0,
            last_activity: Instant::now(),
        }
    }

    /// Seats the guest and starts the game. Sides are assigned uniformly at
    /// random; once assigned they never change for the life of the session.
    pub fn start(&mut self, guest_id: String, guest_name: Option<String>) {
        self.black = Seat::Occupied {
            player_id: guest_id,
            name: guest_name,
        };
        if rand::random() {
            std::mem::swap(&mut self.white, &mut self.black);
        }
        self.phase = Phase::Active;
        self.turn = Side::White;
        self.last_activity = Instant::now();
    }

    pub fn is_full(&self) -> bool {
        !matches!(self.white, Seat::Empty) && !matches!(self.black, Seat::Empty)
    }

    pub fn seat(&self, side: Side) -> &Seat {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut Seat {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    pub fn seat_generation(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_generation,
            Side::Black => self.black_generation,
        }
    }

    fn bump_generation(&mut self, side: Side) {
        match side {
            Side::White => self.white_generation += 1,
            Side::Black => self.black_generation += 1,
        }
    }

    pub fn seat_of(&self, player_id: &str) -> Option<Side> {
        if self.white.player_id() == Some(player_id) {
            Some(Side::White)
        } else if self.black.player_id() == Some(player_id) {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn player_of(&self, side: Side) -> Option<&str> {
        self.seat(side).player_id()
    }

    /// The connection seated opposite `player_id`, if any.
    pub fn opponent_of(&self, player_id: &str) -> Option<&str> {
        let side = self.seat_of(player_id)?;
        self.seat(side.opposite()).player_id()
    }

    /// Turn and bounds enforcement only; legality is the clients' business.
    /// On success the turn passes to the other side and the mover's seat is
    /// returned so the caller can relay to the opponent.
    pub fn accept_move(
        &mut self,
        player_id: &str,
        from: Coord,
        to: Coord,
    ) -> Result<Side, MoveReject> {
        if self.phase != Phase::Active {
            return Err(MoveReject::NotPlaying);
        }
        let side = self.seat_of(player_id).ok_or(MoveReject::NotPlaying)?;
        if side != self.turn {
            return Err(MoveReject::NotYourTurn);
        }
        if !from.in_bounds() || !to.in_bounds() {
            return Err(MoveReject::OutOfBounds);
        }
        self.turn = side.opposite();
        self.last_activity = Instant::now();
        Ok(side)
    }

    /// First terminal event wins; later calls are no-ops. Returns whether
    /// this call set the outcome, i.e. whether the result should be recorded.
    pub fn finish(&mut self, outcome: GameOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        self.phase = Phase::Finished;
        self.last_activity = Instant::now();
        true
    }

    /// Unbinds a connection from its seat, keeping the seat's identity so
    /// the player can reclaim it. Returns the vacated side.
    pub fn detach(&mut self, player_id: &str) -> Option<Side> {
        let side = self.seat_of(player_id)?;
        let name = self.seat(side).name().map(str::to_string);
        *self.seat_mut(side) = Seat::Vacated { name };
        self.bump_generation(side);
        self.last_activity = Instant::now();
        Some(side)
    }

    /// Rebinds a vacated seat to a new connection. All other session state
    /// (side assignment, turn, time control) is untouched.
    pub fn reattach(&mut self, side: Side, player_id: String) -> Result<(), &'static str> {
        if self.phase != Phase::Active {
            return Err("game is over");
        }
        if !self.seat(side).is_vacated() {
            return Err("seat is not open for reconnection");
        }
        let name = self.seat(side).name().map(str::to_string);
        *self.seat_mut(side) = Seat::Occupied { player_id, name };
        self.bump_generation(side);
        self.last_activity = Instant::now();
        Ok(())
    }
}
