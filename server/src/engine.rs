use crate::game_manager::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine failed: {0}")]
    Failed(String),
    #[error("difficulty must be 3, 4 or 5")]
    BadDifficulty,
    #[error("malformed position")]
    BadPosition,
}

/// Fixed search budget per difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPreset {
    pub skill: u8,
    pub depth: u8,
    pub movetime_ms: u64,
}

pub fn preset_for(difficulty: u8) -> Option<SearchPreset> {
    match difficulty {
        3 => Some(SearchPreset {
            skill: 8,
            depth: 8,
            movetime_ms: 500,
        }),
        4 => Some(SearchPreset {
            skill: 14,
            depth: 12,
            movetime_ms: 1000,
        }),
        5 => Some(SearchPreset {
            skill: 20,
            depth: 16,
            movetime_ms: 2000,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Suggestion {
    #[serde(rename = "move")]
    pub mv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate: Option<i32>,
    pub search_depth: u32,
}

struct UciEngine {
    // Held so the process is killed when the handle is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    async fn spawn(bin: &str) -> Result<Self, EngineError> {
        let mut child = Command::new(bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("{bin}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("no engine stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("no engine stdout".to_string()))?;
        let mut engine = Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };
        engine.send("uci").await?;
        engine.wait_for("uciok").await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;
        tracing::info!(bin = %bin, "engine started");
        Ok(engine)
    }

    async fn send(&mut self, line: &str) -> Result<(), EngineError> {
        self.stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Failed(e.to_string()))
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(EngineError::Failed("engine closed its output".to_string())),
            Err(e) => Err(EngineError::Failed(e.to_string())),
        }
    }

    async fn wait_for(&mut self, token: &str) -> Result<(), EngineError> {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                if self.read_line().await?.trim() == token {
                    return Ok(());
                }
            }
        })
        .await
        .map_err(|_| EngineError::Failed(format!("timed out waiting for {token}")))?
    }

    async fn search(
        &mut self,
        position: &str,
        preset: &SearchPreset,
    ) -> Result<Suggestion, EngineError> {
        self.send(&format!("setoption name Skill Level value {}", preset.skill))
            .await?;
        if position == "startpos" {
            self.send("position startpos").await?;
        } else {
            self.send(&format!("position fen {position}")).await?;
        }
        self.send(&format!(
            "go depth {} movetime {}",
            preset.depth, preset.movetime_ms
        ))
        .await?;

        let deadline = Duration::from_millis(preset.movetime_ms + 5_000);
        tokio::time::timeout(deadline, async {
            let mut evaluation = None;
            let mut mate = None;
            let mut search_depth = 0;
            loop {
                let line = self.read_line().await?;
                if let Some(info) = parse_info_line(&line) {
                    evaluation = info.cp.or(evaluation);
                    mate = info.mate.or(mate);
                    if let Some(depth) = info.depth {
                        search_depth = search_depth.max(depth);
                    }
                } else if let Some(mv) = parse_bestmove(&line) {
                    return Ok(Suggestion {
                        mv,
                        evaluation,
                        mate,
                        search_depth,
                    });
                }
            }
        })
        .await
        .map_err(|_| EngineError::Failed("search timed out".to_string()))?
    }
}

/// Lazily-spawned, cached engine process. Any mid-search failure discards
/// the handle; the next request respawns the engine.
pub struct EngineService {
    bin: String,
    handle: Mutex<Option<UciEngine>>,
}

impl EngineService {
    pub fn new(bin: String) -> Self {
        Self {
            bin,
            handle: Mutex::new(None),
        }
    }

    pub async fn suggest(&self, position: &str, difficulty: u8) -> Result<Suggestion, EngineError> {
        let preset = preset_for(difficulty).ok_or(EngineError::BadDifficulty)?;
        // The position is written verbatim onto the engine's stdin; keep it
        // to FEN characters so it cannot smuggle in extra UCI commands.
        if position.is_empty()
            || !position
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || " /-".contains(c))
        {
            return Err(EngineError::BadPosition);
        }
        let mut guard = self.handle.lock().await;
        if guard.is_none() {
            *guard = Some(UciEngine::spawn(&self.bin).await?);
        }
        let Some(engine) = guard.as_mut() else {
            return Err(EngineError::Unavailable("engine not running".to_string()));
        };
        match engine.search(position, &preset).await {
            Ok(suggestion) => Ok(suggestion),
            Err(err) => {
                tracing::warn!(error = %err, "engine failed mid-search, dropping handle");
                *guard = None;
                Err(err)
            }
        }
    }
}

struct InfoLine {
    depth: Option<u32>,
    cp: Option<i32>,
    mate: Option<i32>,
}

fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    let mut info = InfoLine {
        depth: None,
        cp: None,
        mate: None,
    };
    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|v| v.parse().ok()),
            "score" => match tokens.next() {
                Some("cp") => info.cp = tokens.next().and_then(|v| v.parse().ok()),
                Some("mate") => info.mate = tokens.next().and_then(|v| v.parse().ok()),
                _ => {}
            },
            _ => {}
        }
    }
    Some(info)
}

fn parse_bestmove(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    tokens.next().map(str::to_string)
}

// ---- HTTP surface ----

#[derive(Deserialize)]
pub struct EngineRequest {
    pub position: String,
    pub difficulty: u8,
}

pub async fn suggest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EngineRequest>,
) -> Result<Json<Suggestion>, (StatusCode, String)> {
    match state.engine.suggest(&req.position, req.difficulty).await {
        Ok(suggestion) => Ok(Json(suggestion)),
        Err(err @ (EngineError::BadDifficulty | EngineError::BadPosition)) => {
            Err((StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err @ EngineError::Unavailable(_)) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string()))
        }
        Err(err @ EngineError::Failed(_)) => Err((StatusCode::BAD_GATEWAY, err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_presets() {
        assert!(preset_for(2).is_none());
        assert!(preset_for(6).is_none());
        assert_eq!(
            preset_for(3),
            Some(SearchPreset {
                skill: 8,
                depth: 8,
                movetime_ms: 500
            })
        );
        assert_eq!(preset_for(5).map(|p| p.skill), Some(20));
    }

    #[test]
    fn parses_info_lines() {
        let info =
            parse_info_line("info depth 12 seldepth 17 score cp 35 nodes 120394 pv e2e4 e7e5")
                .unwrap();
        assert_eq!(info.depth, Some(12));
        assert_eq!(info.cp, Some(35));
        assert_eq!(info.mate, None);

        let info = parse_info_line("info depth 20 score mate -3 nodes 9000").unwrap();
        assert_eq!(info.mate, Some(-3));
        assert_eq!(info.cp, None);

        assert!(parse_info_line("bestmove e2e4").is_none());
    }

    #[test]
    fn parses_bestmove() {
        assert_eq!(
            parse_bestmove("bestmove e2e4 ponder e7e5"),
            Some("e2e4".to_string())
        );
        assert_eq!(parse_bestmove("bestmove g1f3"), Some("g1f3".to_string()));
        assert!(parse_bestmove("info depth 1").is_none());
    }
}
