use thiserror::Error;

/// Per-message failures surfaced to the sender as an `error` reply.
/// None of these close the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("invalid message")]
    Malformed,
    #[error("username must be 2-20 characters (letters, digits, '-' or '_')")]
    UsernameInvalid,
    #[error("username already set")]
    UsernameAlreadySet,
    #[error("set a username first")]
    UsernameRequired,
    #[error("already in an active game")]
    AlreadyInSession,
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("room is full")]
    RoomFull,
    #[error("cannot play against yourself")]
    SelfPairing,
    #[error("not your turn")]
    NotYourTurn,
    #[error("unsupported time control")]
    BadTimeControl,
    #[error("rate limit exceeded")]
    RateExceeded,
}
