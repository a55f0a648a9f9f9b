use crate::game_manager::{AppState, GameOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::Side;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("username already taken")]
    Conflict,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("account not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    salt: String,
    password_hash: String,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsView {
    pub username: String,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl From<&Account> for StatsView {
    fn from(a: &Account) -> Self {
        Self {
            username: a.username.clone(),
            wins: a.wins,
            losses: a.losses,
            draws: a.draws,
        }
    }
}

/// Win/loss bookkeeping keyed by lowercased identity, with best-effort JSON
/// persistence so records survive a restart.
pub struct AccountStore {
    accounts: DashMap<String, Account>,
    path: Option<PathBuf>,
}

impl AccountStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        let accounts = DashMap::new();
        if let Some(path) = &path {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<Vec<Account>>(&data) {
                    Ok(list) => {
                        for account in list {
                            accounts.insert(account.username.to_lowercase(), account);
                        }
                        tracing::info!(count = accounts.len(), path = %path.display(), "accounts loaded");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, path = %path.display(), "account file unreadable, starting empty");
                    }
                },
                Err(_) => {
                    tracing::info!(path = %path.display(), "no account file yet");
                }
            }
        }
        Self { accounts, path }
    }

    pub fn create(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let key = username.to_lowercase();
        if password.is_empty() {
            return Err(AccountError::BadCredentials);
        }
        // Entry API keeps check-and-insert atomic on the shard.
        match self.accounts.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(AccountError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let salt = random_salt();
                let password_hash = hash_password(&salt, password);
                slot.insert(Account {
                    username: username.to_string(),
                    salt,
                    password_hash,
                    wins: 0,
                    losses: 0,
                    draws: 0,
                });
            }
        }
        tracing::info!(username = %username, "account created");
        self.persist();
        Ok(())
    }

    pub fn verify(&self, username: &str, password: &str) -> Result<StatsView, AccountError> {
        let account = self
            .accounts
            .get(&username.to_lowercase())
            .ok_or(AccountError::BadCredentials)?;
        if hash_password(&account.salt, password) == account.password_hash {
            Ok(StatsView::from(account.value()))
        } else {
            Err(AccountError::BadCredentials)
        }
    }

    pub fn stats(&self, username: &str) -> Result<StatsView, AccountError> {
        self.accounts
            .get(&username.to_lowercase())
            .map(|a| StatsView::from(a.value()))
            .ok_or(AccountError::NotFound)
    }

    /// One counter increment per named participant. Identities that never
    /// registered are skipped; the game itself owes them nothing.
    pub fn record(&self, white: Option<&str>, black: Option<&str>, outcome: GameOutcome) {
        let (white_delta, black_delta) = match outcome {
            GameOutcome::Win(Side::White) => (Delta::Win, Delta::Loss),
            GameOutcome::Win(Side::Black) => (Delta::Loss, Delta::Win),
            GameOutcome::Draw => (Delta::Draw, Delta::Draw),
        };
        let mut dirty = false;
        for (name, delta) in [(white, white_delta), (black, black_delta)] {
            let Some(name) = name else { continue };
            if let Some(mut account) = self.accounts.get_mut(&name.to_lowercase()) {
                match delta {
                    Delta::Win => account.wins += 1,
                    Delta::Loss => account.losses += 1,
                    Delta::Draw => account.draws += 1,
                }
                dirty = true;
            }
        }
        if dirty {
            self.persist();
        }
    }

    pub fn leaderboard(&self, n: usize) -> Vec<StatsView> {
        let mut all: Vec<StatsView> = self
            .accounts
            .iter()
            .map(|a| StatsView::from(a.value()))
            .collect();
        all.sort_by(|a, b| b.wins.cmp(&a.wins).then(a.username.cmp(&b.username)));
        all.truncate(n);
        all
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let list: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        match serde_json::to_string_pretty(&list) {
            Ok(data) => {
                if let Err(err) = std::fs::write(path, data) {
                    tracing::warn!(error = %err, path = %path.display(), "failed to persist accounts");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode accounts"),
        }
    }
}

#[derive(Clone, Copy)]
enum Delta {
    Win,
    Loss,
    Draw,
}

fn random_salt() -> String {
    use rand::{distributions::Alphanumeric, Rng};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{salt}:{password}").as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---- HTTP surface ----

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_top")]
    pub top: usize,
}

fn default_top() -> usize {
    10
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> impl IntoResponse {
    let name = body.username.trim();
    if !is_valid_username(name) {
        return (
            StatusCode::BAD_REQUEST,
            "username must be 2-20 characters (letters, digits, '-' or '_')",
        )
            .into_response();
    }
    match state.accounts.create(name, &body.password) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(AccountError::Conflict) => (StatusCode::CONFLICT, "username already taken").into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> impl IntoResponse {
    match state.accounts.verify(&body.username, &body.password) {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, "invalid username or password").into_response(),
    }
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> impl IntoResponse {
    match state.accounts.stats(&username) {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "account not found").into_response(),
    }
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    Json(state.accounts.leaderboard(query.top.min(100)))
}

fn is_valid_username(name: &str) -> bool {
    let len = name.chars().count();
    (crate::game_manager::USERNAME_MIN..=crate::game_manager::USERNAME_MAX).contains(&len)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
