use chess::Board;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How long, or how deep, the analyzer may think.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    MoveTime(u64),
    Depth(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisLimits {
    pub budget: Budget,
    pub skill_level: Option<u8>,
}

impl AnalysisLimits {
    pub fn movetime(ms: u64) -> Self {
        Self {
            budget: Budget::MoveTime(ms),
            skill_level: None,
        }
    }

    /// Build limits from loosely-specified request fields. A non-zero
    /// move time wins over a depth; with neither, `fallback_ms` is used.
    pub fn from_parts(
        movetime_ms: Option<u64>,
        depth: Option<u8>,
        skill_level: Option<u8>,
        fallback_ms: u64,
    ) -> Self {
        let budget = match (movetime_ms, depth) {
            (Some(ms), _) if ms > 0 => Budget::MoveTime(ms),
            (_, Some(depth)) if depth > 0 => Budget::Depth(depth),
            _ => Budget::MoveTime(fallback_ms),
        };
        Self { budget, skill_level }
    }

    /// Deadline for one analyzer call: the time budget plus `grace`, or
    /// `depth_ceiling` for depth-bounded searches.
    pub fn deadline(&self, grace: Duration, depth_ceiling: Duration) -> Duration {
        match self.budget {
            Budget::MoveTime(ms) => Duration::from_millis(ms) + grace,
            Budget::Depth(_) => depth_ceiling,
        }
    }
}

/// Evaluation from the point of view of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Evaluation {
    #[serde(rename = "cp")]
    Centipawns(i32),
    Mate(i32),
}

impl Evaluation {
    pub fn centipawns(self) -> Option<i32> {
        match self {
            Evaluation::Centipawns(cp) => Some(cp),
            Evaluation::Mate(_) => None,
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Evaluation::Mate(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Analyzer identity, e.g. "Stockfish 16".
    pub engine: String,
    /// Best move in UCI; absent when the position has no legal moves.
    pub best_move: Option<String>,
    pub evaluation: Option<Evaluation>,
    /// Principal variation in SAN, cut at the first move that is not legal.
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub available: bool,
    pub path: Option<PathBuf>,
    pub identity: Option<String>,
    pub error: Option<String>,
}

/// Why an analyzer call produced nothing. The `Display` text is what callers show.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Stockfish not found")]
    NotFound,

    #[error("failed to start engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("engine exited unexpectedly")]
    Exited,
}

/// Request/response contract with an external position analyzer.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, position: &Board, limits: &AnalysisLimits) -> Result<Analysis, AnalyzerError>;

    /// Whether the analyzer can be used at all; never fails.
    fn probe(&self) -> ProbeReport;
}
