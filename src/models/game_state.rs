use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::analysis::AnalyzerError;
use crate::game::clock::{Clock, ClockView, MonotonicTime, TimeSource};
use crate::game::rules::{parse_record, AppliedMove, ChessGame, RulesError, StatusFlags};
use crate::game::utils::Side;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error("Engine did not return a move")]
    NoEngineMove,

    #[error("Position changed while the engine was thinking")]
    PositionChanged,
}

/// Where a connection ended up after joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    Player(Side),
    Spectator,
}

impl Seat {
    pub fn token(self) -> &'static str {
        match self {
            Seat::Player(side) => side.token(),
            Seat::Spectator => "spectator",
        }
    }

    pub fn side(self) -> Option<Side> {
        match self {
            Seat::Player(side) => Some(side),
            Seat::Spectator => None,
        }
    }
}

/// Persisted view of one session. Round-trips through the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub code: String,
    pub fen: String,
    pub status: String,
    pub flags: StatusFlags,
    pub clock: ClockView,
    pub moves: Vec<String>,
    pub san: Vec<String>,
}

/// One board and one clock, moved together.
pub struct GameSession {
    pub code: String,
    game: ChessGame,
    clock: Clock,
    first_player: Option<String>,
    second_player: Option<String>,
    spectators: HashSet<String>,
}

impl GameSession {
    pub fn new(code: impl Into<String>, base_ms: u64, increment_ms: u64) -> Self {
        Self::with_time_source(code, base_ms, increment_ms, Arc::new(MonotonicTime::new()))
    }

    pub fn with_time_source(
        code: impl Into<String>,
        base_ms: u64,
        increment_ms: u64,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            code: code.into(),
            game: ChessGame::new(),
            clock: Clock::with_time_source(base_ms, increment_ms, Side::First, time),
            first_player: None,
            second_player: None,
            spectators: HashSet::new(),
        }
    }

    pub fn game(&self) -> &ChessGame {
        &self.game
    }

    pub fn clock_view(&self) -> ClockView {
        self.clock.snapshot()
    }

    pub fn join(&mut self, connection: &str) -> Seat {
        if let Some(side) = self.player_side(connection) {
            return Seat::Player(side);
        }
        if self.first_player.is_none() {
            self.first_player = Some(connection.to_string());
            Seat::Player(Side::First)
        } else if self.second_player.is_none() {
            self.second_player = Some(connection.to_string());
            Seat::Player(Side::Second)
        } else {
            self.spectators.insert(connection.to_string());
            Seat::Spectator
        }
    }

    pub fn leave(&mut self, connection: &str) {
        for seat in [&mut self.first_player, &mut self.second_player] {
            if seat.as_deref() == Some(connection) {
                *seat = None;
            }
        }
        self.spectators.remove(connection);
    }

    pub fn player_side(&self, connection: &str) -> Option<Side> {
        if self.first_player.as_deref() == Some(connection) {
            Some(Side::First)
        } else if self.second_player.as_deref() == Some(connection) {
            Some(Side::Second)
        } else {
            None
        }
    }

    /// Players move on their own turn. With the other seat empty a player
    /// may move for both sides.
    pub fn may_move(&self, connection: &str) -> bool {
        let turn = self.game.side_to_move();
        match self.player_side(connection) {
            None => false,
            Some(side) if side == turn => true,
            Some(_) => match turn {
                Side::First => self.first_player.is_none(),
                Side::Second => self.second_player.is_none(),
            },
        }
    }

    /// Validate and play a move, then charge the mover's clock.
    pub fn apply_move(&mut self, uci: &str) -> Result<AppliedMove, RulesError> {
        if self.clock.snapshot().flagged.is_some() {
            // latch a zero-crossing the view has already reported
            self.clock.pause();
            return Err(RulesError::Flagged);
        }
        let mover = self.game.side_to_move();
        let applied = self.game.apply(uci)?;
        self.clock.on_move(mover);
        if self.game.is_game_over() {
            self.clock.pause();
            info!("Session {} finished: {}", self.code, self.game.status_label());
        }
        Ok(applied)
    }

    pub fn configure_clock(&mut self, minutes: u64, increment_secs: u64, side: Option<Side>) {
        let side = side.unwrap_or_else(|| self.game.side_to_move());
        self.clock.configure(
            minutes.saturating_mul(60_000),
            increment_secs.saturating_mul(1000),
            side,
        );
    }

    pub fn start_clock(&mut self, side: Option<Side>) {
        if self.game.is_game_over() {
            return;
        }
        self.clock.start(side);
    }

    pub fn pause_clock(&mut self) {
        self.clock.pause();
    }

    /// Fresh board from the standard position; clock back to base.
    pub fn reset(&mut self, side: Option<Side>) {
        self.game = ChessGame::new();
        self.clock.reset(side.unwrap_or(Side::First));
    }

    /// Replace the position. The clock restarts from base, stopped, with
    /// the side to move of the new position on turn.
    pub fn load_fen(&mut self, fen: &str) -> Result<(), RulesError> {
        let game = ChessGame::from_fen(fen)?;
        self.replace_game(game);
        Ok(())
    }

    pub fn import_record(&mut self, text: &str) -> Result<(), RulesError> {
        let record = parse_record(text)?;
        let game = ChessGame::from_record(&record)?;
        self.replace_game(game);
        Ok(())
    }

    fn replace_game(&mut self, game: ChessGame) {
        self.game = game;
        self.clock.reset(self.game.side_to_move());
    }

    pub fn export_record(&self) -> String {
        self.game.export_pgn()
    }

    pub fn legal_destinations(&self, square: &str) -> Vec<String> {
        self.game.legal_destinations(square)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let clock = self.clock.snapshot();
        let mut flags = self.game.status_flags();
        let mut status = self.game.status_label().to_string();

        if let Some(loser) = clock.flagged {
            if !flags.game_over {
                flags.game_over = true;
                flags.result = match loser {
                    Side::First => Some("0-1".to_string()),
                    Side::Second => Some("1-0".to_string()),
                };
                status = format!("{} flagged", loser.label());
            }
        }

        SessionSnapshot {
            code: self.code.clone(),
            fen: self.game.fen(),
            status,
            flags,
            clock,
            moves: self.game.moves().iter().map(|mv| mv.to_string()).collect(),
            san: self.game.san_move_list(),
        }
    }
}
