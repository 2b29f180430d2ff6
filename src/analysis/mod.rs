pub mod analyzer;
pub mod review;
pub mod uci;

pub use analyzer::{Analysis, AnalysisLimits, Analyzer, AnalyzerError, Budget, Evaluation, ProbeReport};
pub use review::{review_moves, review_record, CancelToken, MoveReview, ReviewSummary, Verdict, VerdictCounts};
pub use uci::UciAnalyzer;
