use actix::Addr;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::analysis::uci::pv_to_san;
use crate::analysis::{review_moves, AnalysisLimits, Analyzer, CancelToken, ReviewSummary};
use crate::config::AppConfig;
use crate::game::rules::{parse_uci, to_san, RulesError};
use crate::models::game_state::{GameSession, SessionError, SessionSnapshot};
use crate::models::lock;
use crate::models::messages::{
    ChessWebSocketMessage, EngineMoveResponse, ServerMessage, SuggestResponse,
};
use crate::storage::SnapshotStore;
use crate::websocket::ChessWebSocket;

pub type SharedSession = Arc<Mutex<GameSession>>;

/// Application state shared between connections
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Mutex<HashMap<String, SharedSession>>,
    /// session code -> connection ids in that room
    pub connections: Mutex<HashMap<String, Vec<String>>>,
    /// connection id -> socket actor
    pub sockets: Mutex<HashMap<String, Addr<ChessWebSocket>>>,
    pub analyzer: Arc<dyn Analyzer>,
    pub store: Arc<dyn SnapshotStore>,
}

impl AppState {
    pub fn new(config: AppConfig, analyzer: Arc<dyn Analyzer>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
            analyzer,
            store,
        }
    }

    /// Register a new session under a fresh code. Missing time-control
    /// fields fall back to the configured defaults.
    pub fn create_session(
        &self,
        minutes: Option<u64>,
        increment_secs: Option<u64>,
    ) -> (String, SharedSession) {
        let base_ms = minutes.map_or(self.config.default_base_ms(), |m| m.saturating_mul(60_000));
        let increment_ms = increment_secs.map_or(self.config.default_increment_ms(), |s| {
            s.saturating_mul(1000)
        });

        let mut sessions = lock(&self.sessions);
        let mut code = session_code();
        while sessions.contains_key(&code) {
            code = session_code();
        }
        let session = Arc::new(Mutex::new(GameSession::new(code.clone(), base_ms, increment_ms)));
        sessions.insert(code.clone(), session.clone());
        drop(sessions);

        info!("Created session {} ({}ms + {}ms)", code, base_ms, increment_ms);
        self.persist(&lock(&session));
        (code, session)
    }

    pub fn session(&self, code: &str) -> Result<SharedSession, SessionError> {
        let code = code.trim().to_uppercase();
        lock(&self.sessions)
            .get(&code)
            .cloned()
            .ok_or(SessionError::NotFound(code))
    }

    /// Live snapshot if the session is registered, otherwise the last one stored.
    pub fn lookup_snapshot(&self, code: &str) -> Result<SessionSnapshot, SessionError> {
        match self.session(code) {
            Ok(session) => Ok(lock(&session).snapshot()),
            Err(not_found) => match self.store.load(&code.trim().to_uppercase()) {
                Ok(Some(snapshot)) => Ok(snapshot),
                Ok(None) => Err(not_found),
                Err(e) => {
                    warn!("Snapshot load failed for {}: {}", code, e);
                    Err(not_found)
                }
            },
        }
    }

    pub fn persist(&self, session: &GameSession) {
        self.persist_snapshot(&session.snapshot());
    }

    pub fn persist_snapshot(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.store.save(&snapshot.code, snapshot) {
            warn!("Failed to persist session {}: {}", snapshot.code, e);
        }
    }

    pub fn broadcast(&self, code: &str, message: &ServerMessage) {
        let connection_ids = match lock(&self.connections).get(code) {
            Some(ids) => ids.clone(),
            None => return,
        };
        let addrs: Vec<_> = {
            let sockets = lock(&self.sockets);
            connection_ids
                .iter()
                .filter_map(|id| sockets.get(id).cloned())
                .collect()
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Error serializing message: {}", e);
                return;
            }
        };
        for addr in addrs {
            addr.do_send(ChessWebSocketMessage(text.clone()));
        }
    }

    /// Review the session's moves so far. The session lock is only held
    /// while the move list is copied.
    pub fn review_session(
        &self,
        code: &str,
        limits: &AnalysisLimits,
        cancel: &CancelToken,
    ) -> Result<ReviewSummary, SessionError> {
        let session = self.session(code)?;
        let (start, moves) = {
            let s = lock(&session);
            (*s.game().start(), s.game().moves().to_vec())
        };
        Ok(review_moves(self.analyzer.as_ref(), &start, &moves, limits, cancel))
    }

    pub fn suggest(&self, code: &str) -> Result<SuggestResponse, SessionError> {
        let session = self.session(code)?;
        let (code, position) = {
            let s = lock(&session);
            (s.code.clone(), *s.game().board())
        };

        let limits = AnalysisLimits::movetime(self.config.suggest_movetime_ms);
        let analysis = self.analyzer.analyze(&position, &limits)?;
        let best_move_san = analysis
            .best_move
            .as_deref()
            .and_then(parse_uci)
            .filter(|mv| position.legal(*mv))
            .map(|mv| to_san(&position, mv));
        let pv_san = pv_to_san(&position, &analysis.pv);

        Ok(SuggestResponse {
            code,
            fen: position.to_string(),
            analysis,
            best_move_san,
            pv_san,
        })
    }

    /// Play the analyzer's best move as a real move, then run a short
    /// search from the resulting position.
    pub fn engine_move(&self, code: &str) -> Result<EngineMoveResponse, SessionError> {
        let session = self.session(code)?;
        let (position, ply) = {
            let s = lock(&session);
            if s.game().is_game_over() {
                return Err(RulesError::GameOver.into());
            }
            (*s.game().board(), s.game().moves().len())
        };

        let limits = AnalysisLimits::movetime(self.config.suggest_movetime_ms);
        let analysis = self.analyzer.analyze(&position, &limits)?;
        let best = analysis.best_move.ok_or(SessionError::NoEngineMove)?;

        let (applied, after) = {
            let mut s = lock(&session);
            if s.game().moves().len() != ply || *s.game().board() != position {
                return Err(SessionError::PositionChanged);
            }
            let applied = s.apply_move(&best)?;
            self.persist(&s);
            (applied, *s.game().board())
        };
        info!("Engine played {} in session {}", applied.san, code);

        let follow_up = AnalysisLimits::movetime(self.config.post_move_movetime_ms);
        let analysis = match self.analyzer.analyze(&after, &follow_up) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!("Post-move analysis failed: {}", e);
                None
            }
        };

        let state = lock(&session).snapshot();
        Ok(EngineMoveResponse { applied, analysis, state })
    }
}

fn session_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}
