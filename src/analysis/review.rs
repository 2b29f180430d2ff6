//! Post-game move quality review.
//!
//! Each ply is analysed twice, before and after the move, and the
//! centipawn loss from the mover's point of view drives the verdict.
//! A failure anywhere aborts the whole review; callers never see a
//! partial table.

use chess::{Board, ChessMove};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::analyzer::{AnalysisLimits, Analyzer, Evaluation};
use crate::game::rules::{parse_record, to_san};
use crate::game::utils::Side;

const INACCURACY_CP: i32 = 50;
const MISTAKE_CP: i32 = 100;
const BLUNDER_CP: i32 = 300;
/// Largest loss that still counts as Best when the engine's move was played.
const BEST_TOLERANCE_CP: i32 = 10;
/// Accuracy credit for plies without a centipawn loss (mate lines, missing scores).
const UNSCORED_CREDIT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Best,
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
    Mate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveReview {
    pub ply: usize,
    pub move_uci: String,
    pub move_san: String,
    pub side: Side,
    pub cp_loss: Option<i32>,
    pub verdict: Verdict,
    pub eval_before: Option<Evaluation>,
    pub eval_after: Option<Evaluation>,
    pub best_move: Option<String>,
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub best: u32,
    pub good: u32,
    pub inaccuracy: u32,
    pub mistake: u32,
    pub blunder: u32,
    pub mate: u32,
}

impl VerdictCounts {
    fn bump(&mut self, verdict: Verdict) {
        let slot = match verdict {
            Verdict::Best => &mut self.best,
            Verdict::Good => &mut self.good,
            Verdict::Inaccuracy => &mut self.inaccuracy,
            Verdict::Mistake => &mut self.mistake,
            Verdict::Blunder => &mut self.blunder,
            Verdict::Mate => &mut self.mate,
        };
        *slot += 1;
    }

    pub fn get(&self, verdict: Verdict) -> u32 {
        match verdict {
            Verdict::Best => self.best,
            Verdict::Good => self.good,
            Verdict::Inaccuracy => self.inaccuracy,
            Verdict::Mistake => self.mistake,
            Verdict::Blunder => self.blunder,
            Verdict::Mate => self.mate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub moves: Vec<MoveReview>,
    pub counts: VerdictCounts,
    pub accuracy_percent: Option<f64>,
    pub engine: Option<String>,
    pub ok: bool,
    pub error: Option<String>,
}

impl ReviewSummary {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            moves: Vec::new(),
            counts: VerdictCounts::default(),
            accuracy_percent: None,
            engine: None,
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// Advisory cancellation shared between a review and whoever requested it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parse a game record and review its mainline.
pub fn review_record(
    analyzer: &dyn Analyzer,
    record_text: &str,
    limits: &AnalysisLimits,
    cancel: &CancelToken,
) -> ReviewSummary {
    match parse_record(record_text) {
        Ok(record) => review_moves(analyzer, &record.start, &record.moves, limits, cancel),
        Err(e) => {
            warn!("Review rejected: {}", e);
            ReviewSummary::failed("Could not parse PGN")
        }
    }
}

pub fn review_moves(
    analyzer: &dyn Analyzer,
    start: &Board,
    moves: &[ChessMove],
    limits: &AnalysisLimits,
    cancel: &CancelToken,
) -> ReviewSummary {
    let mut board = *start;
    let mut reviews = Vec::with_capacity(moves.len());
    let mut engine = None;

    for (index, mv) in moves.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Review cancelled after {} of {} plies", index, moves.len());
            return ReviewSummary::failed("Review cancelled");
        }
        if !board.legal(*mv) {
            return ReviewSummary::failed(format!("illegal move at ply {}: {}", index + 1, mv));
        }

        let before = match analyzer.analyze(&board, limits) {
            Ok(analysis) => analysis,
            Err(e) => return abort(index, e.to_string()),
        };
        let side = Side::from(board.side_to_move());
        let move_san = to_san(&board, *mv);
        board = board.make_move_new(*mv);

        let after = match analyzer.analyze(&board, limits) {
            Ok(analysis) => analysis,
            Err(e) => return abort(index, e.to_string()),
        };

        let cp_loss = centipawn_loss(before.evaluation, after.evaluation);
        let verdict = classify(cp_loss, before.evaluation, after.evaluation);
        engine = Some(before.engine);

        reviews.push(MoveReview {
            ply: index + 1,
            move_uci: mv.to_string(),
            move_san,
            side,
            cp_loss,
            verdict,
            eval_before: before.evaluation,
            eval_after: after.evaluation,
            best_move: before.best_move,
            pv: before.pv,
        });
    }

    summarize(reviews, engine)
}

fn abort(index: usize, reason: String) -> ReviewSummary {
    warn!("Review aborted at ply {}: {}", index + 1, reason);
    ReviewSummary::failed(reason)
}

/// Loss for the mover: the evaluation before the move minus the
/// evaluation after it, the latter flipped back to the mover's side.
/// Undefined when either side of the comparison is not a plain score, or
/// when the scores are too large to compare.
pub fn centipawn_loss(before: Option<Evaluation>, after: Option<Evaluation>) -> Option<i32> {
    let cp_before = before.and_then(Evaluation::centipawns)?;
    let cp_after_for_mover = after.and_then(Evaluation::centipawns)?.checked_neg()?;
    cp_before.checked_sub(cp_after_for_mover)
}

pub fn classify(
    cp_loss: Option<i32>,
    before: Option<Evaluation>,
    after: Option<Evaluation>,
) -> Verdict {
    if before.is_some_and(Evaluation::is_mate) || after.is_some_and(Evaluation::is_mate) {
        return Verdict::Mate;
    }
    let loss = match cp_loss {
        Some(loss) => loss.saturating_abs(),
        None => return Verdict::Good,
    };
    if loss >= BLUNDER_CP {
        Verdict::Blunder
    } else if loss >= MISTAKE_CP {
        Verdict::Mistake
    } else if loss >= INACCURACY_CP {
        Verdict::Inaccuracy
    } else {
        Verdict::Good
    }
}

/// Piecewise 0..1 credit for a single ply.
pub fn ply_score(cp_loss: Option<i32>) -> f64 {
    let loss = match cp_loss {
        Some(loss) => loss.saturating_abs(),
        None => return UNSCORED_CREDIT,
    };
    match loss {
        0 => 1.0,
        1..=50 => 0.9,
        51..=100 => 0.8,
        101..=200 => 0.65,
        201..=300 => 0.5,
        301..=500 => 0.3,
        _ => 0.2,
    }
}

fn counted_verdict(review: &MoveReview) -> Verdict {
    if review.verdict == Verdict::Mate {
        return Verdict::Mate;
    }
    let near_zero = review
        .cp_loss
        .is_some_and(|loss| loss.saturating_abs() <= BEST_TOLERANCE_CP);
    if near_zero && review.best_move.as_deref() == Some(review.move_uci.as_str()) {
        Verdict::Best
    } else {
        review.verdict
    }
}

fn summarize(moves: Vec<MoveReview>, engine: Option<String>) -> ReviewSummary {
    let mut counts = VerdictCounts::default();
    for review in &moves {
        counts.bump(counted_verdict(review));
    }

    let accuracy_percent = if moves.is_empty() {
        None
    } else {
        let total: f64 = moves.iter().map(|m| ply_score(m.cp_loss)).sum();
        let mean = total / moves.len() as f64;
        Some((mean * 1000.0).round() / 10.0)
    };

    ReviewSummary {
        moves,
        counts,
        accuracy_percent,
        engine,
        ok: true,
        error: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::analyzer::{Analysis, AnalyzerError, ProbeReport};
    use crate::game::rules::parse_uci;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of responses, one per analyze call.
    pub(crate) struct ScriptedAnalyzer {
        script: Mutex<VecDeque<Result<Analysis, String>>>,
        pub calls: Mutex<usize>,
    }

    impl ScriptedAnalyzer {
        pub(crate) fn new(script: Vec<Result<Analysis, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        fn analyze(&self, _: &Board, _: &AnalysisLimits) -> Result<Analysis, AnalyzerError> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(analysis)) => Ok(analysis),
                Some(Err(reason)) => Err(AnalyzerError::Protocol(reason)),
                None => Err(AnalyzerError::Exited),
            }
        }

        fn probe(&self) -> ProbeReport {
            ProbeReport {
                available: true,
                path: None,
                identity: Some("Scripted".to_string()),
                error: None,
            }
        }
    }

    pub(crate) fn eval(evaluation: Option<Evaluation>, best: Option<&str>) -> Result<Analysis, String> {
        Ok(Analysis {
            engine: "Scripted 1.0".to_string(),
            best_move: best.map(str::to_string),
            evaluation,
            pv: Vec::new(),
        })
    }

    fn cp(value: i32) -> Option<Evaluation> {
        Some(Evaluation::Centipawns(value))
    }

    fn moves(ucis: &[&str]) -> Vec<ChessMove> {
        ucis.iter().map(|u| parse_uci(u).expect("uci")).collect()
    }

    fn run(analyzer: &ScriptedAnalyzer, ucis: &[&str]) -> ReviewSummary {
        review_moves(
            analyzer,
            &Board::default(),
            &moves(ucis),
            &AnalysisLimits::movetime(10),
            &CancelToken::new(),
        )
    }

    #[test]
    fn decreasing_evaluations_classify_by_loss() {
        // after-evals are from the opponent's view: +40 means -40 for the mover
        let analyzer = ScriptedAnalyzer::new(vec![
            eval(cp(0), Some("d2d4")),
            eval(cp(40), None),
            eval(cp(0), Some("d7d5")),
            eval(cp(150), None),
        ]);
        let summary = run(&analyzer, &["e2e4", "e7e5"]);

        assert!(summary.ok);
        assert_eq!(summary.moves.len(), 2);
        assert_eq!(summary.moves[0].cp_loss, Some(40));
        assert_eq!(summary.moves[0].verdict, Verdict::Good);
        assert_eq!(summary.moves[0].side, Side::First);
        assert_eq!(summary.moves[0].move_san, "e4");
        assert_eq!(summary.moves[1].cp_loss, Some(150));
        assert_eq!(summary.moves[1].verdict, Verdict::Mistake);
        assert_eq!(summary.moves[1].side, Side::Second);
        assert_eq!(summary.counts.good, 1);
        assert_eq!(summary.counts.mistake, 1);
        assert_eq!(summary.counts.best, 0);
        // (0.9 + 0.65) / 2
        assert_eq!(summary.accuracy_percent, Some(77.5));
        assert_eq!(summary.engine.as_deref(), Some("Scripted 1.0"));
        assert_eq!(analyzer.call_count(), 4);
    }

    #[test]
    fn engine_move_with_no_loss_is_best() {
        let analyzer = ScriptedAnalyzer::new(vec![eval(cp(30), Some("e2e4")), eval(cp(-30), None)]);
        let summary = run(&analyzer, &["e2e4"]);

        assert_eq!(summary.moves[0].cp_loss, Some(0));
        assert_eq!(summary.moves[0].verdict, Verdict::Good);
        assert_eq!(summary.counts.best, 1);
        assert_eq!(summary.counts.good, 0);
        assert_eq!(summary.accuracy_percent, Some(100.0));
    }

    #[test]
    fn empty_sequence_has_no_accuracy() {
        let analyzer = ScriptedAnalyzer::new(Vec::new());
        let summary = run(&analyzer, &[]);
        assert!(summary.ok);
        assert!(summary.moves.is_empty());
        assert_eq!(summary.accuracy_percent, None);
        assert_eq!(summary.counts, VerdictCounts::default());
        assert_eq!(analyzer.call_count(), 0);
    }

    #[test]
    fn failure_on_first_ply_returns_nothing() {
        let analyzer = ScriptedAnalyzer::new(vec![Err("engine crashed".to_string())]);
        let summary = run(&analyzer, &["e2e4", "e7e5"]);
        assert!(!summary.ok);
        assert!(summary.moves.is_empty());
        assert!(summary.error.as_deref().is_some_and(|e| e.contains("engine crashed")));
        assert_eq!(analyzer.call_count(), 1);
    }

    #[test]
    fn failure_midway_discards_earlier_plies() {
        let analyzer = ScriptedAnalyzer::new(vec![
            eval(cp(0), None),
            eval(cp(0), None),
            eval(cp(0), None),
            Err("timeout".to_string()),
        ]);
        let summary = run(&analyzer, &["e2e4", "e7e5"]);
        assert!(!summary.ok);
        assert!(summary.moves.is_empty());
        assert_eq!(summary.accuracy_percent, None);
    }

    #[test]
    fn mate_scores_override_the_ladder() {
        let analyzer = ScriptedAnalyzer::new(vec![
            eval(Some(Evaluation::Mate(2)), Some("e2e4")),
            eval(cp(-20), None),
        ]);
        let summary = run(&analyzer, &["e2e4"]);
        let review = &summary.moves[0];
        assert_eq!(review.cp_loss, None);
        assert_eq!(review.verdict, Verdict::Mate);
        assert_eq!(summary.counts.mate, 1);
        assert_eq!(summary.counts.best, 0);
        assert_eq!(summary.accuracy_percent, Some(90.0));
    }

    #[test]
    fn missing_score_counts_as_good() {
        let analyzer = ScriptedAnalyzer::new(vec![eval(None, None), eval(cp(10), None)]);
        let summary = run(&analyzer, &["g1f3"]);
        assert_eq!(summary.moves[0].cp_loss, None);
        assert_eq!(summary.moves[0].verdict, Verdict::Good);
    }

    #[test]
    fn cancelled_review_stops_issuing_calls() {
        let analyzer = ScriptedAnalyzer::new(vec![eval(cp(0), None), eval(cp(0), None)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = review_moves(
            &analyzer,
            &Board::default(),
            &moves(&["e2e4"]),
            &AnalysisLimits::movetime(10),
            &cancel,
        );
        assert!(!summary.ok);
        assert_eq!(summary.error.as_deref(), Some("Review cancelled"));
        assert_eq!(analyzer.call_count(), 0);
    }

    /// Cancels the shared token from inside its first call.
    struct CancelOnFirstCall {
        cancel: CancelToken,
        calls: Mutex<usize>,
    }

    impl Analyzer for CancelOnFirstCall {
        fn analyze(&self, _: &Board, _: &AnalysisLimits) -> Result<Analysis, AnalyzerError> {
            *self.calls.lock().unwrap() += 1;
            self.cancel.cancel();
            Ok(Analysis {
                engine: "Scripted 1.0".to_string(),
                best_move: None,
                evaluation: cp(0),
                pv: Vec::new(),
            })
        }

        fn probe(&self) -> ProbeReport {
            ProbeReport {
                available: true,
                path: None,
                identity: None,
                error: None,
            }
        }
    }

    #[test]
    fn cancel_during_first_ply_skips_the_rest() {
        let cancel = CancelToken::new();
        let analyzer = CancelOnFirstCall {
            cancel: cancel.clone(),
            calls: Mutex::new(0),
        };
        let summary = review_moves(
            &analyzer,
            &Board::default(),
            &moves(&["e2e4", "e7e5", "g1f3"]),
            &AnalysisLimits::movetime(10),
            &cancel,
        );
        assert!(!summary.ok);
        assert_eq!(summary.error.as_deref(), Some("Review cancelled"));
        assert!(summary.moves.is_empty());
        assert_eq!(summary.accuracy_percent, None);
        // ply 1 finishes both of its calls, ply 2 is never analysed
        assert_eq!(*analyzer.calls.lock().unwrap(), 2);
    }

    #[test]
    fn oversized_scores_leave_loss_undefined() {
        let huge = cp(2_000_000_000);
        assert_eq!(centipawn_loss(huge, huge), None);
        assert_eq!(centipawn_loss(cp(0), cp(i32::MIN)), None);
        assert_eq!(centipawn_loss(cp(i32::MAX), cp(0)), Some(i32::MAX));
        assert_eq!(classify(None, huge, huge), Verdict::Good);
        assert_eq!(classify(Some(i32::MIN), cp(0), cp(0)), Verdict::Blunder);
        assert_eq!(ply_score(Some(i32::MIN)), 0.2);
    }

    #[test]
    fn unparseable_record_is_reported() {
        let analyzer = ScriptedAnalyzer::new(Vec::new());
        let summary = review_record(
            &analyzer,
            "1. e4 e5 2. Qxf9",
            &AnalysisLimits::movetime(10),
            &CancelToken::new(),
        );
        assert!(!summary.ok);
        assert_eq!(summary.error.as_deref(), Some("Could not parse PGN"));
    }

    #[test]
    fn classification_ladder() {
        assert_eq!(classify(Some(-49), None, None), Verdict::Good);
        assert_eq!(classify(Some(50), None, None), Verdict::Inaccuracy);
        assert_eq!(classify(Some(100), None, None), Verdict::Mistake);
        assert_eq!(classify(Some(-300), None, None), Verdict::Blunder);
        assert_eq!(classify(None, None, Some(Evaluation::Mate(-1))), Verdict::Mate);
    }

    #[test]
    fn score_ladder() {
        assert_eq!(ply_score(Some(0)), 1.0);
        assert_eq!(ply_score(Some(-50)), 0.9);
        assert_eq!(ply_score(Some(100)), 0.8);
        assert_eq!(ply_score(Some(200)), 0.65);
        assert_eq!(ply_score(Some(300)), 0.5);
        assert_eq!(ply_score(Some(500)), 0.3);
        assert_eq!(ply_score(Some(501)), 0.2);
        assert_eq!(ply_score(None), 0.9);
    }
}
